use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use bon::Builder;
use csv::WriterBuilder;
use itertools::Itertools;

use crate::{
    config::CorrectionConfig,
    error::Result,
    math::neg_log10,
    table::{Delimiter, Table},
};

/// Result of one variant–phenotype linear association
#[derive(Debug, Clone, Builder)]
pub struct AssociationResult {
    pub snp: String,
    pub a1: String,
    pub chr: String,
    pub beta: f64,
    pub stat: f64,
    pub p: f64,
    /// Number of subjects used in the fit
    pub n: usize,
    pub p_adj: Option<f64>,
    /// Phenotype (brain region) tested, when several were run together
    pub pheno: Option<String>,
}
impl AssociationResult {
    /// A failed fit keeps its identifiers with NaN statistics
    pub fn failed(snp: String, a1: String, chr: String, n: usize) -> Self {
        Self::builder()
            .snp(snp)
            .a1(a1)
            .chr(chr)
            .beta(f64::NAN)
            .stat(f64::NAN)
            .p(f64::NAN)
            .n(n)
            .build()
    }
}

/// What a brain-map value is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionValue {
    #[default]
    NegLog10P,
    P,
    Beta,
}

#[derive(Debug, Clone, Default)]
pub struct AssociationResults {
    pub rows: Vec<AssociationResult>,
}
impl AssociationResults {
    pub fn from_vec(rows: Vec<AssociationResult>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn snps(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.snp.clone()).unique().collect()
    }

    pub fn pvalues(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.p).collect()
    }

    /// Keeps the associations with `P <= threshold`, in their original order
    pub fn best_snps(&self, threshold: f64) -> Self {
        Self::from_vec(
            self.rows
                .iter()
                .filter(|r| r.p <= threshold)
                .cloned()
                .collect(),
        )
    }

    /// Fills `p_adj` using the given correction over all rows
    pub fn correct(&mut self, correction: CorrectionConfig) {
        let adjusted = correction.transform(&self.pvalues());
        for (row, p_adj) in self.rows.iter_mut().zip(adjusted) {
            row.p_adj = Some(p_adj);
        }
    }

    /// Fills `p_adj` separately within each phenotype
    pub fn correct_per_phenotype(&mut self, correction: CorrectionConfig) {
        let groups = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.pheno.clone(), i))
            .into_group_map();
        for indices in groups.values() {
            let pvalues = indices.iter().map(|i| self.rows[*i].p).collect::<Vec<_>>();
            for (i, p_adj) in indices.iter().zip(correction.transform(&pvalues)) {
                self.rows[*i].p_adj = Some(p_adj);
            }
        }
    }

    /// One value per atlas label, taken from the most significant row of each phenotype
    ///
    /// `labels` maps phenotype names to atlas labels; unmatched phenotypes are skipped.
    pub fn region_values(&self, labels: &HashMap<String, i64>, value: RegionValue) -> BTreeMap<i64, f64> {
        let mut best: HashMap<&str, &AssociationResult> = HashMap::new();
        for row in self.rows.iter().filter(|r| r.p.is_finite()) {
            let Some(pheno) = row.pheno.as_deref() else {
                continue;
            };
            match best.get(pheno) {
                Some(current) if current.p <= row.p => {}
                _ => {
                    best.insert(pheno, row);
                }
            }
        }
        best.into_iter()
            .filter_map(|(pheno, row)| {
                let label = labels.get(pheno)?;
                let v = match value {
                    RegionValue::NegLog10P => neg_log10(row.p),
                    RegionValue::P => row.p,
                    RegionValue::Beta => row.beta,
                };
                Some((*label, v))
            })
            .collect()
    }

    fn header(&self) -> Vec<&'static str> {
        let mut header = vec!["SNP", "A1", "CHR", "BETA", "STAT", "P", "N"];
        if self.rows.iter().any(|r| r.p_adj.is_some()) {
            header.push("P_ADJ");
        }
        if self.rows.iter().any(|r| r.pheno.is_some()) {
            header.push("PHENO");
        }
        header
    }

    /// Writes the results as a tab separated table
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let header = self.header();
        let with_adj = header.contains(&"P_ADJ");
        let with_pheno = header.contains(&"PHENO");
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record(&header)?;
        for r in &self.rows {
            let mut record = vec![
                r.snp.clone(),
                r.a1.clone(),
                r.chr.clone(),
                r.beta.to_string(),
                r.stat.to_string(),
                r.p.to_string(),
                r.n.to_string(),
            ];
            if with_adj {
                record.push(r.p_adj.map(|p| p.to_string()).unwrap_or_default());
            }
            if with_pheno {
                record.push(r.pheno.clone().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a table written by [`AssociationResults::write_tsv`]
    pub fn read_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let table = Table::read(path, Delimiter::Tab)?;
        let snps = table.text("SNP")?;
        let a1 = table.text("A1")?;
        let chr = table.text("CHR")?;
        let beta = table.numeric("BETA")?;
        let stat = table.numeric("STAT")?;
        let p = table.numeric("P")?;
        let n = table.numeric("N")?;
        let p_adj = table.numeric("P_ADJ").ok();
        let pheno = table.text("PHENO").ok();
        let rows = (0..table.len())
            .map(|i| {
                AssociationResult::builder()
                    .snp(snps[i].clone())
                    .a1(a1[i].clone())
                    .chr(chr[i].clone())
                    .beta(beta[i])
                    .stat(stat[i])
                    .p(p[i])
                    .n(if n[i].is_finite() { n[i] as usize } else { 0 })
                    .maybe_p_adj(p_adj.as_ref().map(|v| v[i]))
                    .maybe_pheno(pheno.as_ref().map(|v| v[i].clone()))
                    .build()
            })
            .collect();
        Ok(Self::from_vec(rows))
    }

    pub fn pprint(&self) {
        println!("{}", self.header().join("\t"));
        for r in &self.rows {
            print!("{}\t{}\t{}\t{}\t{}\t{}\t{}", r.snp, r.a1, r.chr, r.beta, r.stat, r.p, r.n);
            if let Some(p_adj) = r.p_adj {
                print!("\t{p_adj}");
            }
            if let Some(pheno) = &r.pheno {
                print!("\t{pheno}");
            }
            println!();
        }
    }
}
