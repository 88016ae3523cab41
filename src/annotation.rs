//! Annotation of SNPs to the genes whose (windowed) span contains them
//!
//! The gene build is a MAGMA style gene location file:
//! `GENE_ID CHR START STOP STRAND GENE_NAME`, whitespace separated, no header.

use std::{collections::HashMap, fs, path::Path};

use csv::WriterBuilder;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneLocation {
    pub id: String,
    pub chr: String,
    pub start: i64,
    pub stop: i64,
    pub strand: String,
    pub name: String,
}

/// A gene and the SNPs annotated to it
#[derive(Debug, Clone, PartialEq)]
pub struct GeneAnnotation {
    pub gene_id: String,
    pub chr: String,
    pub start: i64,
    pub stop: i64,
    pub name: String,
    pub snps: Vec<String>,
}
impl GeneAnnotation {
    pub fn n_snps(&self) -> usize {
        self.snps.len()
    }
}

/// A SNP and the genes it falls into
#[derive(Debug, Clone, PartialEq)]
pub struct SnpAnnotation {
    pub snp_id: String,
    pub gene_ids: Vec<String>,
    pub gene_names: Vec<String>,
}
impl SnpAnnotation {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub genes: Vec<GeneAnnotation>,
    pub snps: Vec<SnpAnnotation>,
    /// SNPs that could not be parsed or fall outside every gene
    pub not_found: Vec<String>,
}
impl Annotation {
    /// Writes the gene and SNP tables as tab separated files, lists joined by `,`
    pub fn write_tsv<P: AsRef<Path>>(&self, genes_path: P, snps_path: P) -> Result<()> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(genes_path)?;
        writer.write_record(["GENE_ID", "CHR", "START", "STOP", "NAME", "SNP", "N_SNP"])?;
        for g in &self.genes {
            writer.write_record([
                g.gene_id.clone(),
                g.chr.clone(),
                g.start.to_string(),
                g.stop.to_string(),
                g.name.clone(),
                g.snps.join(","),
                g.n_snps().to_string(),
            ])?;
        }
        writer.flush()?;

        let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(snps_path)?;
        writer.write_record(["SNP_ID", "GENES", "N_GENES", "GENE_NAMES"])?;
        for s in &self.snps {
            writer.write_record([
                s.snp_id.clone(),
                s.gene_ids.join(","),
                s.n_genes().to_string(),
                s.gene_names.join(","),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub fn read_gene_build<P: AsRef<Path>>(path: P) -> Result<Vec<GeneLocation>> {
    let content = fs::read_to_string(path.as_ref())?;
    let genes = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(idx, line)| {
            let f = line.split_whitespace().collect::<Vec<_>>();
            let invalid = |details: &str| Error::InvalidTable {
                line: idx + 1,
                details: details.to_string(),
            };
            if f.len() < 6 {
                return Err(invalid("gene build rows need 6 fields"));
            }
            Ok(GeneLocation {
                id: f[0].to_string(),
                chr: f[1].to_string(),
                start: f[2].parse().map_err(|_| invalid("invalid start"))?,
                stop: f[3].parse().map_err(|_| invalid("invalid stop"))?,
                strand: f[4].to_string(),
                name: f[5].to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("Read {} gene locations", genes.len());
    Ok(genes)
}

fn normalize_chr(chr: &str) -> &str {
    chr.strip_prefix("chr")
        .or_else(|| chr.strip_prefix("CHR"))
        .unwrap_or(chr)
}

/// Splits a `CHR:BP[:...]` identifier
fn parse_snp_id(snp: &str) -> Option<(&str, i64)> {
    let mut parts = snp.split(':');
    let chr = parts.next()?;
    let bp = parts.next()?.parse().ok()?;
    Some((normalize_chr(chr), bp))
}

/// Annotates each SNP to every gene with `START - w < BP < STOP + w`
///
/// `window_kb` is the symmetric up/down-stream window in kilobases.
pub fn annotate_snps(snps: &[String], genes: &[GeneLocation], window_kb: u32) -> Annotation {
    let window = i64::from(window_kb) * 1000;
    let mut by_chr: HashMap<&str, Vec<&GeneLocation>> = HashMap::new();
    for gene in genes {
        by_chr.entry(normalize_chr(&gene.chr)).or_default().push(gene);
    }

    let mut annotation = Annotation::default();
    let mut gene_index: HashMap<String, usize> = HashMap::new();
    let mut snp_index: HashMap<String, usize> = HashMap::new();

    for snp in snps {
        let Some((chr, bp)) = parse_snp_id(snp) else {
            annotation.not_found.push(snp.clone());
            continue;
        };
        let hits = by_chr
            .get(chr)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|g| g.start - window < bp && bp < g.stop + window)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if hits.is_empty() {
            annotation.not_found.push(snp.clone());
            continue;
        }
        for gene in hits {
            let g = *gene_index.entry(gene.id.clone()).or_insert_with(|| {
                annotation.genes.push(GeneAnnotation {
                    gene_id: gene.id.clone(),
                    chr: chr.to_string(),
                    start: gene.start,
                    stop: gene.stop,
                    name: gene.name.clone(),
                    snps: Vec::new(),
                });
                annotation.genes.len() - 1
            });
            annotation.genes[g].snps.push(snp.clone());

            let s = *snp_index.entry(snp.clone()).or_insert_with(|| {
                annotation.snps.push(SnpAnnotation {
                    snp_id: snp.clone(),
                    gene_ids: Vec::new(),
                    gene_names: Vec::new(),
                });
                annotation.snps.len() - 1
            });
            annotation.snps[s].gene_ids.push(gene.id.clone());
            annotation.snps[s].gene_names.push(gene.name.clone());
        }
    }
    info!(
        "Annotated {} SNPs to {} genes, {} SNPs not found",
        annotation.snps.len(),
        annotation.genes.len(),
        annotation.not_found.len()
    );
    annotation
}
