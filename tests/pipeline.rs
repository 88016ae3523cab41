use std::{fs, io::Write, path::Path, path::PathBuf};

use approx::assert_relative_eq;
use nimagen::{
    annotate_snps, mass_univariate_test, ora, read_gene_build, AssociationDesign, AssociationResults, BedFile,
    CorrectionConfig, Delimiter, ResampleScheme, StabilityConfig, StabilityTest, Table,
};

const CAUSAL: [u8; 12] = [0, 1, 2, 0, 1, 2, 0, 1, 2, 1, 0, 2];
const NOISE: [u8; 12] = [1, 0, 1, 2, 0, 1, 2, 1, 0, 0, 2, 1];
const AGE: [f64; 12] = [30., 35., 40., 45., 50., 55., 31., 36., 41., 46., 51., 56.];
const JITTER: [f64; 12] = [0.1, -0.2, 0.05, 0.0, 0.15, -0.1, -0.05, 0.2, -0.15, 0.1, 0.0, -0.1];

/// Packs allele 1 counts into variant-major PLINK bytes
fn encode_variant(counts: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; counts.len().div_ceil(4)];
    for (i, count) in counts.iter().enumerate() {
        let code = match count {
            2 => 0b00,
            1 => 0b10,
            _ => 0b11,
        };
        bytes[i / 4] |= code << (2 * (i % 4));
    }
    bytes
}

/// Writes a 12 subject cohort: one causal, one noise and one monomorphic variant
fn write_cohort(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let prefix = dir.join("cohort");
    let mut fam = fs::File::create(prefix.with_extension("fam")).unwrap();
    for i in 0..12 {
        writeln!(fam, "F{i}-A I{i} 0 0 1 -9").unwrap();
    }
    let mut bim = fs::File::create(prefix.with_extension("bim")).unwrap();
    writeln!(bim, "1\t1:100\t0\t100\tA\tG").unwrap();
    writeln!(bim, "1\t1:200\t0\t200\tC\tT").unwrap();
    writeln!(bim, "2\t2:300\t0\t300\tG\tA").unwrap();
    let mut bed = vec![0x6c, 0x1b, 0x01];
    bed.extend(encode_variant(&CAUSAL));
    bed.extend(encode_variant(&NOISE));
    bed.extend(encode_variant(&[2; 12]));
    fs::write(prefix.with_extension("bed"), bed).unwrap();

    let pheno = dir.join("pheno.tsv");
    let mut file = fs::File::create(&pheno).unwrap();
    writeln!(file, "FID\tIID\tWM_sum").unwrap();
    for i in 0..12 {
        let y = 1.0 + 0.8 * f64::from(CAUSAL[i]) + 0.02 * AGE[i] + JITTER[i];
        writeln!(file, "F{i}\tI{i}\t{y}").unwrap();
    }
    // subject without a phenotype
    writeln!(file, "F12\tI12\tNA").unwrap();

    let covar = dir.join("covar.tsv");
    let mut file = fs::File::create(&covar).unwrap();
    writeln!(file, "FID\tIID\tage").unwrap();
    for i in 0..12 {
        writeln!(file, "F{i}\tI{i}\t{}", AGE[i]).unwrap();
    }
    (prefix, pheno, covar)
}

fn load_table(pheno: &Path, covar: &Path) -> (Table, Vec<String>) {
    let pheno = Table::read(pheno, Delimiter::Tab).unwrap();
    let covar = Table::read(covar, Delimiter::Tab).unwrap();
    let covariates = covar.default_covariates();
    (pheno.merge_on_fid(&covar).unwrap(), covariates)
}

#[test]
fn test_association_stability_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let (prefix, pheno, covar) = write_cohort(dir.path());
    let (table, covariates) = load_table(&pheno, &covar);
    assert_eq!(table.len(), 12);
    assert_eq!(covariates, vec!["age"]);

    let bed = BedFile::open(&prefix).unwrap();
    let (extracted, mut results) = mass_univariate_test(&bed, &table, &covariates, "WM_sum", None, false).unwrap();
    assert_eq!(extracted.n_individuals(), 12);
    assert_eq!(results.len(), 3);
    results.correct(CorrectionConfig::Bonferroni);

    let causal = &results.rows[0];
    assert_eq!(causal.snp, "1:100");
    assert_eq!(causal.n, 12);
    assert!(causal.beta > 0.6 && causal.beta < 1.0);
    assert!(causal.p < 1e-4);
    assert!(results.rows[1].p > causal.p);
    assert!(results.rows[2].p.is_nan());
    assert!(results.rows[2].p_adj.unwrap().is_nan());

    let path = dir.path().join("assoc.tsv");
    results.write_tsv(&path).unwrap();
    let best = AssociationResults::read_tsv(&path).unwrap().best_snps(1e-4);
    assert_eq!(best.snps(), vec!["1:100"]);

    let design = AssociationDesign::align(&extracted, &table, &covariates).unwrap();
    let config = StabilityConfig::builder()
        .n_resamples(50)
        .scheme(ResampleScheme::Subsample { fraction: 0.8 })
        .seed(7)
        .build();
    let stability = StabilityTest::new(&design, config.clone(), false)
        .run("WM_sum", &best.snps())
        .unwrap();
    assert_eq!(stability.rows.len(), 1);
    let row = &stability.rows[0];
    assert!(row.stable);
    assert!(row.selection_frequency >= 0.9);
    assert_relative_eq!(row.sign_consistency, 1.0);
    assert_eq!(stability.stable_snps(), vec!["1:100"]);

    let again = StabilityTest::new(&design, config, false)
        .run("WM_sum", &best.snps())
        .unwrap();
    assert_relative_eq!(again.rows[0].beta_mean, row.beta_mean);

    let build = dir.path().join("genes.loc");
    fs::write(&build, "1001\t1\t50\t150\t+\tGENE1\n1002\t2\t1000\t2000\t-\tGENE2\n").unwrap();
    let genes = read_gene_build(&build).unwrap();
    let annotation = annotate_snps(&stability.stable_snps(), &genes, 0);
    assert_eq!(annotation.genes.len(), 1);
    assert_eq!(annotation.genes[0].name, "GENE1");
    assert_eq!(annotation.genes[0].snps, vec!["1:100"]);
    assert!(annotation.not_found.is_empty());
}

#[test]
fn test_annotated_genes_feed_enrichment() {
    let dir = tempfile::tempdir().unwrap();
    let gmt = dir.path().join("sets.gmt");
    fs::write(
        &gmt,
        "SYNAPSE\thttp://sets/synapse\tG0\tG1\tG2\tG3\tG4\nMYELIN\thttp://sets/myelin\tG10\tG11\tG12\n",
    )
    .unwrap();
    let pathways = nimagen::read_gmt(&gmt).unwrap();
    let background = (0..20).map(|i| format!("G{i}")).collect::<Vec<_>>();
    let genes = ["G0", "G1", "G2", "G19"].map(String::from).to_vec();

    let results = ora(&pathways, &background, &genes, CorrectionConfig::Bonferroni, false).unwrap();
    assert_eq!(results.rows.len(), 2);
    let synapse = results.rows.iter().find(|r| r.gene_set == "SYNAPSE").unwrap();
    assert_eq!(synapse.n_overlap, 3);
    assert_eq!(synapse.genes, "G0:G1:G2");
    assert!(synapse.adj_p >= synapse.p);
    let myelin = results.rows.iter().find(|r| r.gene_set == "MYELIN").unwrap();
    assert_relative_eq!(myelin.p, 1.0);

    let path = dir.path().join("ora.tsv");
    results.write_tsv(&path).unwrap();
    let read = nimagen::EnrichmentResults::read_tsv(&path).unwrap();
    assert_eq!(read.rows, results.rows);
}
