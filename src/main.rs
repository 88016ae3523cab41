use std::{collections::HashSet, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use nimagen::{
    annotate_snps,
    geneset::{create_heatmap, enrichment_bar_svg, gene_pvalue_bar_svg, heatmap_svg, GeneBarOptions},
    ora, plot_segmentation, read_fid_list, read_gene_build, read_gene_list, read_gmt, write_roi_coordinates,
    AssociationDesign, AssociationResults, Atlas, BedFile, Colormap, CorrectionConfig, Delimiter,
    LabelLookup, MapView, MassUnivariate, RegionValue, ResampleScheme, SegmentationOptions,
    StabilityConfig, StabilityTest, Table,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tests every variant against one or more imaging phenotypes
    Assoc(AssocArgs),
    /// Resampling stability of the significant associations
    Stability(StabilityArgs),
    /// Maps SNPs to the genes containing them
    Annotate(AnnotateArgs),
    /// Over-representation analysis of a gene list over gene sets
    Ora(OraArgs),
    /// Centre of mass of every region of an atlas
    Rois(RoisArgs),
    /// Renders an atlas, optionally coloured by association results
    Brainmap(BrainmapArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Correction {
    None,
    Fdr,
    Bonferroni,
}
impl From<Correction> for CorrectionConfig {
    fn from(correction: Correction) -> Self {
        match correction {
            Correction::None => CorrectionConfig::Identity,
            Correction::Fdr => CorrectionConfig::Fdr,
            Correction::Bonferroni => CorrectionConfig::Bonferroni,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Scheme {
    Bootstrap,
    Subsample,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Value {
    NegLog10P,
    P,
    Beta,
}
impl From<Value> for RegionValue {
    fn from(value: Value) -> Self {
        match value {
            Value::NegLog10P => RegionValue::NegLog10P,
            Value::P => RegionValue::P,
            Value::Beta => RegionValue::Beta,
        }
    }
}

/// Genotype and subject data shared by the regression based subcommands
#[derive(Args, Debug)]
struct SubjectArgs {
    /// PLINK fileset prefix or `.bed` path
    #[arg(short, long, env = "NIMAGEN_BFILE")]
    bfile: PathBuf,

    /// Tab separated phenotype table
    #[arg(long, requires = "covar", conflicts_with = "combined")]
    pheno: Option<PathBuf>,

    /// Tab separated covariate table
    #[arg(long, requires = "pheno")]
    covar: Option<PathBuf>,

    /// Space separated table holding phenotypes and covariates together
    #[arg(long)]
    combined: Option<PathBuf>,

    /// Covariate columns (default: every column after FID and IID)
    #[arg(long, value_delimiter = ',')]
    covariates: Option<Vec<String>>,

    /// Restrict the analysis to the families of this FID table
    #[arg(long)]
    keep: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long)]
    no_progress: bool,
}
impl SubjectArgs {
    /// Loads the subject table and resolves the covariates
    fn load(&self, phenotypes: &[String]) -> Result<(Table, Vec<String>)> {
        let (table, default_covariates) = match (&self.combined, &self.pheno, &self.covar) {
            (Some(combined), _, _) => {
                let table = Table::read(combined, Delimiter::Space)
                    .with_context(|| format!("reading {}", combined.display()))?
                    .drop_missing();
                let covariates = table
                    .default_covariates()
                    .into_iter()
                    .filter(|c| !phenotypes.contains(c))
                    .collect::<Vec<_>>();
                (table, covariates)
            }
            (None, Some(pheno), Some(covar)) => {
                let pheno_table = Table::read(pheno, Delimiter::Tab)
                    .with_context(|| format!("reading {}", pheno.display()))?;
                let covar_table = Table::read(covar, Delimiter::Tab)
                    .with_context(|| format!("reading {}", covar.display()))?;
                let covariates = covar_table.default_covariates();
                (pheno_table.merge_on_fid(&covar_table)?, covariates)
            }
            _ => bail!("either --combined or both --pheno and --covar are required"),
        };

        let table = match &self.keep {
            Some(path) => {
                let fids = read_fid_list(path).with_context(|| format!("reading {}", path.display()))?;
                let fids = fids.iter().map(String::as_str).collect::<HashSet<_>>();
                table.filter_fids(&fids)?
            }
            None => table,
        };
        let covariates = self.covariates.clone().unwrap_or(default_covariates);
        info!("{} subjects with covariates {:?}", table.len(), covariates);
        Ok((table, covariates))
    }

    /// Builds the regression design restricted to the given variants
    fn design(&self, phenotypes: &[String], snps: Option<&[String]>) -> Result<AssociationDesign> {
        let (table, covariates) = self.load(phenotypes)?;
        let bed = BedFile::open(&self.bfile).with_context(|| format!("opening {}", self.bfile.display()))?;
        let fids = table.fids()?;
        let extracted = bed.extract(snps, Some(&fids));
        Ok(AssociationDesign::align(&extracted, &table, &covariates)?)
    }
}

#[derive(Args, Debug)]
struct AssocArgs {
    #[command(flatten)]
    subjects: SubjectArgs,

    /// Phenotype columns to test, one run per column
    #[arg(short, long, required = true, value_delimiter = ',')]
    phenotype: Vec<String>,

    /// File of variant ids to restrict the test to, one per line
    #[arg(long)]
    snps: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Correction::Fdr)]
    correction: Correction,

    /// Also write the variants with P at or below this threshold
    #[arg(long)]
    best_threshold: Option<f64>,

    /// Output TSV
    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct StabilityArgs {
    #[command(flatten)]
    subjects: SubjectArgs,

    #[arg(short, long)]
    phenotype: String,

    /// Association results whose best variants are retested
    #[arg(long, conflicts_with = "snps")]
    results: Option<PathBuf>,

    /// P threshold selecting the variants of `--results`
    #[arg(long, default_value_t = 5e-8)]
    best_threshold: f64,

    /// File of variant ids to retest, one per line
    #[arg(long)]
    snps: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    n_resamples: usize,

    /// Significance level counted as a selection
    #[arg(long, default_value_t = 0.05)]
    alpha: f64,

    /// Selection frequency required to call an association stable
    #[arg(long, default_value_t = 0.8)]
    threshold: f64,

    #[arg(long, value_enum, default_value_t = Scheme::Bootstrap)]
    scheme: Scheme,

    /// Fraction of subjects drawn by `--scheme subsample`
    #[arg(long, default_value_t = 0.5)]
    fraction: f64,

    #[arg(long, default_value_t = 0)]
    seed: usize,

    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// File of `CHR:BP` variant ids, one per line
    #[arg(long, conflicts_with = "results")]
    snps: Option<PathBuf>,

    /// Association results whose best variants are annotated
    #[arg(long)]
    results: Option<PathBuf>,

    #[arg(long, default_value_t = 5e-8)]
    best_threshold: f64,

    /// MAGMA gene location build
    #[arg(short, long, env = "NIMAGEN_GENE_BUILD")]
    genes: PathBuf,

    /// Window around each gene in kilobases
    #[arg(short, long, default_value_t = 0)]
    window: u32,

    #[arg(long)]
    out_genes: PathBuf,

    #[arg(long)]
    out_snps: PathBuf,
}

#[derive(Args, Debug)]
struct OraArgs {
    /// Gene sets in GMT format
    #[arg(long, env = "NIMAGEN_GMT")]
    gmt: PathBuf,

    /// Background genes, one per line
    #[arg(long)]
    background: PathBuf,

    /// Query genes, one per line
    #[arg(short, long)]
    genes: PathBuf,

    #[arg(long, value_enum, default_value_t = Correction::Bonferroni)]
    correction: Correction,

    #[arg(short, long)]
    out: PathBuf,

    /// adjP threshold of the gene sets drawn in the figures
    #[arg(long, default_value_t = 0.05)]
    plot_threshold: f64,

    /// Gene set membership heatmap SVG
    #[arg(long)]
    heatmap: Option<PathBuf>,

    /// Enrichment bar chart SVG
    #[arg(long)]
    bars: Option<PathBuf>,

    /// Tab separated gene table used to order the heatmap genes
    #[arg(long, requires = "ordered_by")]
    gene_table: Option<PathBuf>,

    /// p-value column of `--gene-table`
    #[arg(long)]
    ordered_by: Option<String>,

    /// Number of genes kept in the heatmap
    #[arg(long)]
    top: Option<usize>,

    /// Per-gene p-value bar chart SVG, requires `--gene-table`
    #[arg(long, requires = "gene_table")]
    gene_bars: Option<PathBuf>,

    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct RoisArgs {
    /// NIfTI atlas
    #[arg(short, long)]
    atlas: PathBuf,

    #[arg(short, long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct BrainmapArgs {
    /// NIfTI atlas
    #[arg(short, long)]
    atlas: PathBuf,

    /// Association results with a PHENO column naming the regions
    #[arg(long, requires = "labels")]
    results: Option<PathBuf>,

    /// `LABEL NAME` lookup of the atlas regions
    #[arg(long)]
    labels: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Value::NegLog10P)]
    value: Value,

    /// Regions whose value does not pass are left blank
    #[arg(long)]
    threshold: Option<f64>,

    /// `all` or a comma separated list of axial, coronal, sagittal
    #[arg(long, default_value = "all")]
    views: String,

    #[arg(long, default_value = "spectral")]
    cmap: String,

    #[arg(long)]
    reversed: bool,

    #[arg(long)]
    colorbar: bool,

    #[arg(long)]
    title: Option<String>,

    /// Output SVG
    #[arg(short, long)]
    out: PathBuf,
}

fn run_assoc(args: AssocArgs) -> Result<()> {
    let snps = args
        .snps
        .as_ref()
        .map(|path| read_gene_list(path).with_context(|| format!("reading {}", path.display())))
        .transpose()?;
    let design = args.subjects.design(&args.phenotype, snps.as_deref())?;
    let test = MassUnivariate::new(&design, !args.subjects.no_progress);

    let mut results = if args.phenotype.len() == 1 {
        let mut results = test.run(&args.phenotype[0])?;
        results.correct(args.correction.into());
        results
    } else {
        let mut results = test.run_phenotypes(&args.phenotype)?;
        results.correct_per_phenotype(args.correction.into());
        results
    };
    results.write_tsv(&args.out)?;
    info!("Wrote {} associations to {}", results.len(), args.out.display());

    if let Some(threshold) = args.best_threshold {
        results = results.best_snps(threshold);
        let path = args.out.with_extension("best.tsv");
        results.write_tsv(&path)?;
        info!("Wrote {} associations with P <= {threshold} to {}", results.len(), path.display());
    }
    Ok(())
}

fn best_snps(results: &Option<PathBuf>, snps: &Option<PathBuf>, threshold: f64) -> Result<Vec<String>> {
    match (results, snps) {
        (Some(path), _) => {
            let results =
                AssociationResults::read_tsv(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(results.best_snps(threshold).snps().into_iter().unique().collect())
        }
        (None, Some(path)) => Ok(read_gene_list(path).with_context(|| format!("reading {}", path.display()))?),
        (None, None) => bail!("either --results or --snps is required"),
    }
}

fn run_stability(args: StabilityArgs) -> Result<()> {
    let snps = best_snps(&args.results, &args.snps, args.best_threshold)?;
    if snps.is_empty() {
        bail!("no variant selected for the stability test");
    }
    let phenotypes = vec![args.phenotype.clone()];
    let design = args.subjects.design(&phenotypes, Some(&snps))?;

    let scheme = match args.scheme {
        Scheme::Bootstrap => ResampleScheme::Bootstrap,
        Scheme::Subsample => ResampleScheme::Subsample {
            fraction: args.fraction,
        },
    };
    let config = StabilityConfig::builder()
        .n_resamples(args.n_resamples)
        .alpha(args.alpha)
        .threshold(args.threshold)
        .scheme(scheme)
        .seed(args.seed)
        .build();
    let results = StabilityTest::new(&design, config, !args.subjects.no_progress).run(&args.phenotype, &snps)?;
    results.write_tsv(&args.out)?;
    info!("Wrote {} stability results to {}", results.rows.len(), args.out.display());
    Ok(())
}

fn run_annotate(args: AnnotateArgs) -> Result<()> {
    let snps = best_snps(&args.results, &args.snps, args.best_threshold)?;
    let genes = read_gene_build(&args.genes).with_context(|| format!("reading {}", args.genes.display()))?;
    let annotation = annotate_snps(&snps, &genes, args.window);
    annotation.write_tsv(&args.out_genes, &args.out_snps)?;
    info!(
        "Annotated {} SNPs to {} genes, {} not found",
        annotation.snps.len(),
        annotation.genes.len(),
        annotation.not_found.len()
    );
    Ok(())
}

fn run_ora(args: OraArgs) -> Result<()> {
    let pathways = read_gmt(&args.gmt).with_context(|| format!("reading {}", args.gmt.display()))?;
    let background =
        read_gene_list(&args.background).with_context(|| format!("reading {}", args.background.display()))?;
    let genes = read_gene_list(&args.genes).with_context(|| format!("reading {}", args.genes.display()))?;

    let results = ora(&pathways, &background, &genes, args.correction.into(), !args.no_progress)?;
    results.write_tsv(&args.out)?;
    info!("Wrote {} gene sets to {}", results.rows.len(), args.out.display());

    let significant = results.significant(args.plot_threshold);
    if let Some(path) = &args.bars {
        enrichment_bar_svg(&significant, None).write(path)?;
    }
    if args.heatmap.is_none() && args.gene_bars.is_none() {
        return Ok(());
    }
    let gene_table = args
        .gene_table
        .as_ref()
        .map(|path| Table::read(path, Delimiter::Tab).with_context(|| format!("reading {}", path.display())))
        .transpose()?;
    let heatmap = create_heatmap(
        &significant,
        gene_table.as_ref(),
        args.top,
        args.ordered_by.as_deref(),
        nimagen::geneset::GENE_NAME_COLUMN,
    )?;
    if let Some(path) = &args.heatmap {
        heatmap_svg(&heatmap).write(path)?;
    }
    if let (Some(path), Some(table), Some(ordered_by)) = (&args.gene_bars, &gene_table, &args.ordered_by) {
        let options = GeneBarOptions::builder().ordered_by(ordered_by.clone()).build();
        gene_pvalue_bar_svg(table, &heatmap.genes, &options)?.write(path)?;
    }
    Ok(())
}

fn run_rois(args: RoisArgs) -> Result<()> {
    let atlas = Atlas::open(&args.atlas).with_context(|| format!("opening {}", args.atlas.display()))?;
    let rois = atlas.roi_coordinates();
    write_roi_coordinates(&rois, &args.out)?;
    info!("Wrote {} regions to {}", rois.len(), args.out.display());
    Ok(())
}

fn run_brainmap(args: BrainmapArgs) -> Result<()> {
    let atlas = Atlas::open(&args.atlas).with_context(|| format!("opening {}", args.atlas.display()))?;
    let lookup = args
        .labels
        .as_ref()
        .map(|path| LabelLookup::read(path).with_context(|| format!("reading {}", path.display())))
        .transpose()?;
    let colormap: Colormap = args.cmap.parse()?;

    let builder = SegmentationOptions::builder()
        .views(MapView::parse_list(&args.views)?)
        .colormap(colormap)
        .reversed(args.reversed)
        .colorbar(args.colorbar)
        .maybe_colorbar_title(args.title.clone())
        .maybe_threshold(args.threshold);
    let options = match (&args.results, &lookup) {
        (Some(path), Some(lookup)) => {
            let results =
                AssociationResults::read_tsv(path).with_context(|| format!("reading {}", path.display()))?;
            let values = results.region_values(&lookup.by_name(), args.value.into());
            if values.is_empty() {
                bail!("no phenotype of {} matches a region of the lookup", path.display());
            }
            builder.plot_values(values).build()
        }
        (None, Some(lookup)) => builder.label_legend(lookup.entries.clone()).build(),
        _ => builder.build(),
    };
    plot_segmentation(&atlas, &options)?.write_svg(&args.out)?;
    info!("Wrote brain map to {}", args.out.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "nimagen=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Assoc(args) => run_assoc(args),
        Command::Stability(args) => run_stability(args),
        Command::Annotate(args) => run_annotate(args),
        Command::Ora(args) => run_ora(args),
        Command::Rois(args) => run_rois(args),
        Command::Brainmap(args) => run_brainmap(args),
    }
}
