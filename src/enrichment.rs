//! Over-representation analysis of a gene list against curated gene sets

use std::{collections::HashSet, fs, path::Path};

use csv::{ReaderBuilder, WriterBuilder};
use derive_new::new;
use indicatif::ProgressIterator;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::CorrectionConfig,
    error::{Error, Result},
    math::hypergeometric_upper_tail,
    utils::progress_bar,
};

/// One line of a GMT file: `name url gene...`
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub url: String,
    pub genes: Vec<String>,
}

/// Reads a GMT file, keeping every line (even those without genes)
pub fn read_gmt<P: AsRef<Path>>(path: P) -> Result<Vec<GeneSet>> {
    let content = fs::read_to_string(path.as_ref())?;
    let sets = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut fields = line.split('\t').map(|f| f.trim().to_string());
            GeneSet {
                name: fields.next().unwrap_or_default(),
                url: fields.next().unwrap_or_default(),
                genes: fields.filter(|g| !g.is_empty()).collect(),
            }
        })
        .collect::<Vec<_>>();
    debug!("Read {} gene sets from {}", sets.len(), path.as_ref().display());
    Ok(sets)
}

/// One gene per line, blanks skipped
pub fn read_gene_list<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Outcome of a single hypergeometric test
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    /// Set genes present in the background
    pub n_genes: usize,
    /// Query genes present in the restricted set
    pub n_overlap: usize,
    pub p: f64,
    /// Overlapping genes joined by `:`
    pub genes: String,
}

/// Tests whether the query genes are over-represented in a pathway
///
/// Pathway genes are first restricted to the background, keeping repeated
/// entries. `population` is the background size as supplied. A single
/// overlapping gene is never considered enriched (`p = 1`).
pub fn hypergeometric_test(
    pathway: &[String],
    background: &HashSet<&str>,
    population: usize,
    genes: &[String],
) -> Overlap {
    let restricted = pathway
        .iter()
        .map(String::as_str)
        .filter(|g| background.contains(g))
        .collect::<Vec<_>>();
    let members = restricted.iter().copied().collect::<HashSet<_>>();
    let overlap = genes
        .iter()
        .filter(|g| members.contains(g.as_str()))
        .map(String::as_str)
        .collect::<Vec<_>>();
    let x = overlap.len();
    let p = if x > 1 {
        hypergeometric_upper_tail(
            x as u64,
            population as u64,
            restricted.len() as u64,
            genes.len() as u64,
        )
    } else {
        1.0
    };
    Overlap {
        n_genes: restricted.len(),
        n_overlap: x,
        p,
        genes: overlap.join(":"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(rename = "GeneSet")]
    pub gene_set: String,
    #[serde(rename = "N_genes")]
    pub n_genes: usize,
    #[serde(rename = "N_overlap")]
    pub n_overlap: usize,
    pub p: f64,
    pub genes: String,
    #[serde(rename = "adjP")]
    pub adj_p: f64,
}
impl EnrichmentResult {
    /// Share of the gene set covered by the query
    pub fn proportion(&self) -> f64 {
        if self.n_genes == 0 {
            0.0
        } else {
            self.n_overlap as f64 / self.n_genes as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentResults {
    pub rows: Vec<EnrichmentResult>,
}
impl EnrichmentResults {
    /// Rows with an adjusted p-value at or below the threshold
    pub fn significant(&self, threshold: f64) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|r| r.adj_p <= threshold)
                .cloned()
                .collect(),
        }
    }

    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<EnrichmentResult>, _>>()?;
        Ok(Self { rows })
    }

    pub fn pprint(&self) {
        println!("GeneSet\tN_genes\tN_overlap\tp\tadjP\tgenes");
        for r in &self.rows {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                r.gene_set, r.n_genes, r.n_overlap, r.p, r.adj_p, r.genes
            );
        }
    }
}

/// Over-representation analysis of a query gene list over a gene set collection
#[derive(new)]
pub struct Ora<'a> {
    pathways: &'a [GeneSet],
    background: &'a [String],
    genes: &'a [String],
    correction: CorrectionConfig,
    progress: bool,
}
impl<'a> Ora<'a> {
    pub fn run(&self) -> Result<EnrichmentResults> {
        if self.genes.is_empty() {
            return Err(Error::InvalidArgument("the query gene list is empty".to_string()));
        }
        let background = self.background.iter().map(String::as_str).collect::<HashSet<_>>();
        let bar = progress_bar(self.pathways.len(), self.progress, "enrichment");

        let mut rows = self
            .pathways
            .iter()
            .progress_with(bar)
            .filter(|set| !set.genes.is_empty())
            .map(|set| {
                let overlap = hypergeometric_test(&set.genes, &background, self.background.len(), self.genes);
                EnrichmentResult {
                    gene_set: set.name.clone(),
                    n_genes: overlap.n_genes,
                    n_overlap: overlap.n_overlap,
                    p: overlap.p,
                    genes: overlap.genes,
                    adj_p: overlap.p,
                }
            })
            .collect::<Vec<_>>();

        let pvalues = rows.iter().map(|r| r.p).collect::<Vec<_>>();
        let adjusted = match self.correction {
            // family size is every supplied set, including those skipped above
            CorrectionConfig::Bonferroni => pvalues
                .iter()
                .map(|p| (p * self.pathways.len() as f64).min(1.0))
                .collect(),
            other => other.transform(&pvalues),
        };
        for (row, adj_p) in rows.iter_mut().zip(adjusted) {
            row.adj_p = adj_p;
        }
        info!(
            "Tested {} gene sets, {} with adjusted p <= 0.05",
            rows.len(),
            rows.iter().filter(|r| r.adj_p <= 0.05).count()
        );
        Ok(EnrichmentResults { rows })
    }
}

/// Runs an over-representation analysis of `genes` over `pathways`
pub fn ora(
    pathways: &[GeneSet],
    background: &[String],
    genes: &[String],
    correction: CorrectionConfig,
    progress: bool,
) -> Result<EnrichmentResults> {
    Ora::new(pathways, background, genes, correction, progress).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn background() -> Vec<String> {
        (0..20).map(|i| format!("G{i}")).collect()
    }

    #[test]
    fn test_hypergeometric_small_case() {
        let bg = background();
        let bg_set = bg.iter().map(String::as_str).collect::<HashSet<_>>();
        let pathway = strings(&["G0", "G1", "G2", "G3", "NOT_IN_BG"]);
        let genes = strings(&["G0", "G1", "G10"]);
        let overlap = hypergeometric_test(&pathway, &bg_set, bg.len(), &genes);
        assert_eq!(overlap.n_genes, 4);
        assert_eq!(overlap.n_overlap, 2);
        assert_eq!(overlap.genes, "G0:G1");
        // P(X >= 2) with N=20, K=4, n=3: (C(4,2)C(16,1) + C(4,3)) / C(20,3)
        assert_relative_eq!(overlap.p, 100.0 / 1140.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hypergeometric_counts_repeated_genes() {
        let mut bg = background();
        bg.push("G5".to_string());
        let bg_set = bg.iter().map(String::as_str).collect::<HashSet<_>>();
        let pathway = strings(&["G0", "G0", "G1", "G2"]);
        let genes = strings(&["G0", "G1", "G10"]);
        let overlap = hypergeometric_test(&pathway, &bg_set, bg.len(), &genes);
        assert_eq!(overlap.n_genes, 4);
        assert_eq!(overlap.n_overlap, 2);
        // P(X >= 2) with N=21, K=4, n=3: (C(4,2)C(17,1) + C(4,3)) / C(21,3)
        assert_relative_eq!(overlap.p, 106.0 / 1330.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_overlap_is_not_enriched() {
        let bg = background();
        let bg_set = bg.iter().map(String::as_str).collect::<HashSet<_>>();
        let overlap = hypergeometric_test(&strings(&["G0", "G1"]), &bg_set, bg.len(), &strings(&["G0"]));
        assert_eq!(overlap.n_overlap, 1);
        assert_eq!(overlap.p, 1.0);
    }

    #[test]
    fn test_ora_bonferroni_counts_every_set() {
        let pathways = vec![
            GeneSet {
                name: "SET_A".to_string(),
                url: "url".to_string(),
                genes: strings(&["G0", "G1", "G2", "G3"]),
            },
            GeneSet {
                name: "EMPTY".to_string(),
                url: "url".to_string(),
                genes: vec![],
            },
        ];
        let results = ora(
            &pathways,
            &background(),
            &strings(&["G0", "G1", "G10"]),
            CorrectionConfig::Bonferroni,
            false,
        )
        .unwrap();
        assert_eq!(results.rows.len(), 1);
        assert_relative_eq!(results.rows[0].adj_p, 2.0 * 100.0 / 1140.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ora_fdr_adjusts_across_sets() {
        let pathways = vec![
            GeneSet {
                name: "SET_A".to_string(),
                url: "url".to_string(),
                genes: strings(&["G0", "G1", "G2", "G3"]),
            },
            GeneSet {
                name: "SET_B".to_string(),
                url: "url".to_string(),
                genes: strings(&["G0", "G1", "G10", "G11"]),
            },
            GeneSet {
                name: "SET_C".to_string(),
                url: "url".to_string(),
                genes: strings(&["G15", "G16"]),
            },
        ];
        let results = ora(
            &pathways,
            &background(),
            &strings(&["G0", "G1", "G10"]),
            CorrectionConfig::Fdr,
            false,
        )
        .unwrap();
        assert_eq!(results.rows.len(), 3);
        assert_relative_eq!(results.rows[0].p, 100.0 / 1140.0, epsilon = 1e-12);
        assert_relative_eq!(results.rows[1].p, 4.0 / 1140.0, epsilon = 1e-12);
        assert_relative_eq!(results.rows[0].adj_p, 150.0 / 1140.0, epsilon = 1e-12);
        assert_relative_eq!(results.rows[1].adj_p, 12.0 / 1140.0, epsilon = 1e-12);
        assert_relative_eq!(results.rows[2].adj_p, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ora_rejects_empty_query() {
        assert!(ora(&[], &background(), &[], CorrectionConfig::Fdr, false).is_err());
    }

    #[test]
    fn test_gmt_and_results_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let gmt = dir.path().join("sets.gmt");
        fs::write(&gmt, "SET_A\thttp://a\tG0\tG1\tG2\nSHORT\thttp://b\n").unwrap();
        let sets = read_gmt(&gmt).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].genes, strings(&["G0", "G1", "G2"]));
        assert!(sets[1].genes.is_empty());

        let results = ora(
            &sets,
            &background(),
            &strings(&["G0", "G1"]),
            CorrectionConfig::Identity,
            false,
        )
        .unwrap();
        let out = dir.path().join("ora.tsv");
        results.write_tsv(&out).unwrap();
        let header = fs::read_to_string(&out).unwrap();
        assert!(header.starts_with("GeneSet\tN_genes\tN_overlap\tp\tgenes\tadjP"));
        let read = EnrichmentResults::read_tsv(&out).unwrap();
        assert_eq!(read.rows[0].gene_set, "SET_A");
        assert_eq!(read.rows[0].genes, "G0:G1");
    }

    #[test]
    fn test_read_gene_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genes.txt");
        fs::write(&path, "FOXP2\n\n  CNTNAP2 \n").unwrap();
        assert_eq!(read_gene_list(&path).unwrap(), strings(&["FOXP2", "CNTNAP2"]));
    }
}
