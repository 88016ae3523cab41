//! Figures summarising a gene-set enrichment: membership heatmap, enrichment
//! bars and per-gene association bars

use std::{cmp::Ordering, collections::HashSet};

use bon::Builder;
use ndarray::Array2;

use crate::{
    colormap::{ColorScale, Colormap, Rgb},
    enrichment::EnrichmentResults,
    error::{Error, Result},
    math::neg_log10,
    svg::{format_tick, ticks, Anchor, Document},
    table::Table,
};

pub const GENE_NAME_COLUMN: &str = "Genes_Name";

/// Gene names that differ between gene-set collections and gene tables
const GENE_ALIASES: [(&str, &str); 2] = [("ADGRV1", "GPR98"), ("ADGRB3", "BAI3")];

fn alias(gene: &str) -> &str {
    GENE_ALIASES
        .iter()
        .find(|(current, _)| *current == gene)
        .map_or(gene, |(_, legacy)| legacy)
}

/// Binary gene set × gene membership matrix
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSetHeatmap {
    pub matrix: Array2<f64>,
    pub gene_sets: Vec<String>,
    pub genes: Vec<String>,
}

/// Genes of a gene table ordered by ascending `ordered_by`, first occurrence per gene
fn ordered_genes(table: &Table, name_column: &str, ordered_by: &str) -> Result<Vec<(String, usize)>> {
    let names = table.text(name_column)?;
    let pvalues = table.numeric(ordered_by)?;
    let mut order = (0..names.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| {
        pvalues[*a]
            .partial_cmp(&pvalues[*b])
            .unwrap_or(Ordering::Equal)
    });
    let mut seen = HashSet::new();
    Ok(order
        .into_iter()
        .filter_map(|i| {
            let name = alias(&names[i]).to_string();
            seen.insert(name.clone()).then_some((name, i))
        })
        .collect())
}

/// Builds the membership heatmap of the enriched gene sets
///
/// With `ordered_by`, genes follow ascending p in `gene_table`, genes absent
/// from the table coming last in alphabetical order. Without it, genes are
/// alphabetical. `top` keeps the first genes of that order.
pub fn create_heatmap(
    results: &EnrichmentResults,
    gene_table: Option<&Table>,
    top: Option<usize>,
    ordered_by: Option<&str>,
    name_column: &str,
) -> Result<GeneSetHeatmap> {
    let gene_sets = results.rows.iter().map(|r| r.gene_set.clone()).collect::<Vec<_>>();
    let members = results
        .rows
        .iter()
        .map(|r| {
            r.genes
                .split(':')
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect::<HashSet<_>>()
        })
        .collect::<Vec<_>>();
    let mut all_genes = members.iter().flatten().cloned().collect::<Vec<_>>();
    all_genes.sort();
    all_genes.dedup();

    let limit = top.unwrap_or(usize::MAX);
    let genes: Vec<String> = match ordered_by {
        Some(ordered_by) => {
            let table = gene_table.ok_or_else(|| {
                Error::InvalidArgument("ordering genes requires a gene table".to_string())
            })?;
            let present = all_genes.iter().map(String::as_str).collect::<HashSet<_>>();
            let mut ranked = ordered_genes(table, name_column, ordered_by)?
                .into_iter()
                .map(|(name, _)| name)
                .filter(|name| present.contains(name.as_str()))
                .collect::<Vec<_>>();
            // genes missing from the table follow the ranked ones
            let unranked = all_genes
                .iter()
                .filter(|g| !ranked.contains(g))
                .cloned()
                .collect::<Vec<_>>();
            ranked.extend(unranked);
            ranked.into_iter().take(limit).collect()
        }
        None => all_genes.into_iter().take(limit).collect(),
    };

    let mut matrix = Array2::<f64>::zeros((gene_sets.len(), genes.len()));
    for (r, set) in members.iter().enumerate() {
        for (c, gene) in genes.iter().enumerate() {
            if set.contains(gene) {
                matrix[[r, c]] = 1.0;
            }
        }
    }
    Ok(GeneSetHeatmap {
        matrix,
        gene_sets,
        genes,
    })
}

fn text_width(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * 0.6
}

/// Blues heatmap with gene sets on the rows and genes on the columns
pub fn heatmap_svg(heatmap: &GeneSetHeatmap) -> Document {
    let cell = 20.0;
    let font = 11.0;
    let left = 10.0
        + heatmap
            .gene_sets
            .iter()
            .map(|s| text_width(s, font))
            .fold(0.0, f64::max);
    let bottom = 10.0
        + heatmap
            .genes
            .iter()
            .map(|g| text_width(g, font) * 0.75)
            .fold(0.0, f64::max);
    let (rows, cols) = heatmap.matrix.dim();
    let mut doc = Document::new(left + cols as f64 * cell + 20.0, 20.0 + rows as f64 * cell + bottom);
    let scale = ColorScale::new(Colormap::Blues, false, 0.0, 1.0);
    for ((r, c), value) in heatmap.matrix.indexed_iter() {
        doc.rect(
            left + c as f64 * cell,
            20.0 + r as f64 * cell,
            cell,
            cell,
            scale.color(*value),
            Some(Rgb::WHITE),
        );
    }
    for (r, set) in heatmap.gene_sets.iter().enumerate() {
        doc.text(left - 4.0, 20.0 + (r as f64 + 0.7) * cell, set, font, Anchor::End);
    }
    let label_y = 20.0 + rows as f64 * cell + 6.0;
    for (c, gene) in heatmap.genes.iter().enumerate() {
        let x = left + (c as f64 + 0.5) * cell;
        doc.rotated_text(x, label_y, gene, font, Anchor::End, -45.0);
    }
    doc
}

/// Horizontal bars of `-log10(adjP)` per gene set, coloured by overlap proportion
pub fn enrichment_bar_svg(results: &EnrichmentResults, xlabel: Option<&str>) -> Document {
    let bar = 18.0;
    let font = 11.0;
    let plot_width = 300.0;
    let left = 10.0
        + results
            .rows
            .iter()
            .map(|r| text_width(&r.gene_set, font))
            .fold(0.0, f64::max);
    let heights = results.rows.iter().map(|r| neg_log10(r.adj_p)).collect::<Vec<_>>();
    let max = heights.iter().copied().filter(|h| h.is_finite()).fold(0.0, f64::max);
    let proportions = results.rows.iter().map(|r| r.proportion()).collect::<Vec<_>>();
    let scale = ColorScale::fitted(Colormap::Reds, false, &proportions);

    let plot_height = results.rows.len() as f64 * bar;
    let mut doc = Document::new(left + plot_width + 130.0, plot_height + 70.0);
    let top = 20.0;
    for (i, (row, height)) in results.rows.iter().zip(heights.iter()).enumerate() {
        let y = top + i as f64 * bar;
        let width = if max > 0.0 && height.is_finite() {
            height / max * plot_width
        } else {
            0.0
        };
        doc.rect(left, y + 2.0, width, bar - 4.0, scale.color(row.proportion()), None);
        doc.text(left - 4.0, y + bar * 0.7, &row.gene_set, font, Anchor::End);
    }
    doc.line(left, top, left, top + plot_height, Rgb::BLACK, 1.0);
    doc.line(left, top + plot_height, left + plot_width, top + plot_height, Rgb::BLACK, 1.0);
    for tick in ticks(0.0, max, 5) {
        let x = left + if max > 0.0 { tick / max * plot_width } else { 0.0 };
        doc.line(x, top + plot_height, x, top + plot_height + 4.0, Rgb::BLACK, 1.0);
        doc.text(x, top + plot_height + 16.0, &format_tick(tick), 10.0, Anchor::Middle);
    }
    doc.text(
        left + plot_width / 2.0,
        top + plot_height + 36.0,
        xlabel.unwrap_or("-log10(adjP)"),
        12.0,
        Anchor::Middle,
    );
    doc.colorbar(
        &scale,
        left + plot_width + 20.0,
        top,
        plot_height.max(60.0),
        Some("Proportion"),
    );
    doc
}

/// Colouring of the gene bars by the `coloured_by` column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarColouring {
    /// Red when `p` reaches the threshold, grey otherwise
    Threshold(f64),
    /// CoolWarm palette by rank
    Rank,
}
impl Default for BarColouring {
    fn default() -> Self {
        BarColouring::Threshold(5e-8)
    }
}

#[derive(Debug, Clone, Builder)]
pub struct GeneBarOptions {
    #[builder(default = GENE_NAME_COLUMN.to_string())]
    pub name_column: String,
    /// p-value column giving the bar heights and the duplicate resolution
    pub ordered_by: String,
    /// Second p-value column used to colour the bars
    pub coloured_by: Option<String>,
    /// Count column annotated above bars when greater than one
    #[builder(default = "N_SNP".to_string())]
    pub bar_number: String,
    #[builder(default = true)]
    pub annotate: bool,
    #[builder(default)]
    pub colouring: BarColouring,
    #[builder(default = "phenotype".to_string())]
    pub ylabel: String,
}

/// Heights, colours and counts of the per-gene bars
#[derive(Debug, Clone, PartialEq)]
pub struct GeneBars {
    pub genes: Vec<String>,
    pub heights: Vec<f64>,
    pub colours: Vec<Rgb>,
    pub counts: Vec<Option<f64>>,
}

/// Bars of `-log10(p)` for the heatmap genes, in heatmap order
pub fn gene_bars(table: &Table, genes: &[String], options: &GeneBarOptions) -> Result<GeneBars> {
    let ordered = ordered_genes(table, &options.name_column, &options.ordered_by)?;
    let pvalues = table.numeric(&options.ordered_by)?;
    let colour_values = options
        .coloured_by
        .as_deref()
        .map(|c| table.numeric(c))
        .transpose()?;
    let counts = if options.annotate {
        Some(table.numeric(&options.bar_number)?)
    } else {
        None
    };

    let rows = genes
        .iter()
        .filter_map(|gene| ordered.iter().find(|(name, _)| name == gene).map(|(_, i)| (gene, *i)))
        .collect::<Vec<_>>();

    let colours = match &colour_values {
        Some(values) => {
            let scores = rows.iter().map(|(_, i)| neg_log10(values[*i])).collect::<Vec<_>>();
            match options.colouring {
                BarColouring::Threshold(threshold) => scores
                    .iter()
                    .map(|s| if *s < neg_log10(threshold) { Rgb::GREY } else { Rgb::RED })
                    .collect(),
                BarColouring::Rank => {
                    let palette = Colormap::CoolWarm.evenly_spaced(scores.len(), false);
                    scores
                        .iter()
                        .map(|s| palette[scores.iter().filter(|o| *o < s).count()])
                        .collect()
                }
            }
        }
        None => vec![Rgb(66, 146, 198); rows.len()],
    };

    Ok(GeneBars {
        genes: rows.iter().map(|(g, _)| (*g).clone()).collect(),
        heights: rows.iter().map(|(_, i)| neg_log10(pvalues[*i])).collect(),
        colours,
        counts: rows
            .iter()
            .map(|(_, i)| counts.as_ref().map(|c| c[*i]))
            .collect(),
    })
}

pub fn gene_pvalue_bar_svg(table: &Table, genes: &[String], options: &GeneBarOptions) -> Result<Document> {
    let bars = gene_bars(table, genes, options)?;
    let width = 24.0;
    let plot_height = 240.0;
    let left = 60.0;
    let top = 20.0;
    let max = bars.heights.iter().copied().filter(|h| h.is_finite()).fold(0.0, f64::max);
    let mut doc = Document::new(left + bars.genes.len() as f64 * width + 20.0, top + plot_height + 30.0);
    for (i, (height, colour)) in bars.heights.iter().zip(bars.colours.iter()).enumerate() {
        let h = if max > 0.0 && height.is_finite() {
            height / max * plot_height
        } else {
            0.0
        };
        let x = left + i as f64 * width;
        let y = top + plot_height - h;
        doc.rect(x + 2.0, y, width - 4.0, h, Some(*colour), None);
        if let Some(count) = bars.counts[i].filter(|c| *c > 1.0) {
            doc.text(x + width / 2.0, y - 3.0, &format!("{count}"), 10.0, Anchor::Middle);
        }
    }
    doc.line(left, top, left, top + plot_height, Rgb::BLACK, 1.0);
    for tick in ticks(0.0, max, 5) {
        let y = top + plot_height - if max > 0.0 { tick / max * plot_height } else { 0.0 };
        doc.line(left - 4.0, y, left, y, Rgb::BLACK, 1.0);
        doc.text(left - 6.0, y + 4.0, &format_tick(tick), 10.0, Anchor::End);
    }
    doc.rotated_text(
        14.0,
        top + plot_height / 2.0,
        &format!("-log10(SNP p-value) {}", options.ylabel),
        12.0,
        Anchor::Middle,
        -90.0,
    );
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::EnrichmentResult;

    fn results() -> EnrichmentResults {
        let row = |name: &str, genes: &str, adj_p| EnrichmentResult {
            gene_set: name.to_string(),
            n_genes: 10,
            n_overlap: genes.split(':').count(),
            p: adj_p,
            genes: genes.to_string(),
            adj_p,
        };
        EnrichmentResults {
            rows: vec![
                row("SYNAPSE", "GPR98:CNTNAP2:FOXP2", 1e-4),
                row("AXON", "FOXP2:ROBO1", 1e-2),
            ],
        }
    }

    fn gene_table() -> Table {
        let rows = [
            ("ADGRV1", "1e-9", "1e-10", "3"),
            ("FOXP2", "1e-6", "0.2", "1"),
            ("FOXP2", "1e-3", "0.3", "5"),
            ("ROBO1", "1e-8", "1e-9", "2"),
            ("OTHER", "1e-12", "0.5", "1"),
        ];
        Table::new(
            vec!["Genes_Name".into(), "P".into(), "P_scz".into(), "N_SNP".into()],
            rows.iter()
                .map(|(a, b, c, d)| vec![a.to_string(), b.to_string(), c.to_string(), d.to_string()])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_heatmap_all_genes_sorted() {
        let heatmap = create_heatmap(&results(), None, None, None, GENE_NAME_COLUMN).unwrap();
        assert_eq!(heatmap.genes, vec!["CNTNAP2", "FOXP2", "GPR98", "ROBO1"]);
        assert_eq!(heatmap.gene_sets, vec!["SYNAPSE", "AXON"]);
        assert_eq!(heatmap.matrix.row(1).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_heatmap_top_ordered_by_gene_table() {
        let table = gene_table();
        let heatmap = create_heatmap(&results(), Some(&table), Some(2), Some("P"), GENE_NAME_COLUMN).unwrap();
        // OTHER is in no set, ADGRV1 is matched through its alias
        assert_eq!(heatmap.genes, vec!["GPR98", "ROBO1"]);
        assert_eq!(heatmap.matrix.column(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_heatmap_ordered_without_top() {
        let table = gene_table();
        let heatmap = create_heatmap(&results(), Some(&table), None, Some("P"), GENE_NAME_COLUMN).unwrap();
        assert_eq!(heatmap.genes, vec!["GPR98", "ROBO1", "FOXP2", "CNTNAP2"]);
        assert_eq!(heatmap.matrix.row(1).to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_heatmap_ordering_requires_table() {
        assert!(create_heatmap(&results(), None, Some(2), Some("P"), GENE_NAME_COLUMN).is_err());
    }

    #[test]
    fn test_gene_bars_threshold_colours() {
        let genes = vec!["GPR98".to_string(), "FOXP2".to_string(), "ROBO1".to_string()];
        let options = GeneBarOptions::builder()
            .ordered_by("P".to_string())
            .coloured_by("P_scz".to_string())
            .build();
        let bars = gene_bars(&gene_table(), &genes, &options).unwrap();
        assert_eq!(bars.genes, genes);
        assert!((bars.heights[1] - 6.0).abs() < 1e-9);
        assert_eq!(bars.colours, vec![Rgb::RED, Rgb::GREY, Rgb::RED]);
        assert_eq!(bars.counts, vec![Some(3.0), Some(1.0), Some(2.0)]);

        let svg = gene_pvalue_bar_svg(&gene_table(), &genes, &options).unwrap().render();
        assert!(svg.contains(">3</text>"));
        assert!(!svg.contains(">1</text>"));
    }

    #[test]
    fn test_gene_bars_rank_colours() {
        let genes = vec!["GPR98".to_string(), "FOXP2".to_string()];
        let options = GeneBarOptions::builder()
            .ordered_by("P".to_string())
            .coloured_by("P_scz".to_string())
            .colouring(BarColouring::Rank)
            .build();
        let bars = gene_bars(&gene_table(), &genes, &options).unwrap();
        let palette = Colormap::CoolWarm.evenly_spaced(2, false);
        assert_eq!(bars.colours, vec![palette[1], palette[0]]);
    }

    #[test]
    fn test_svgs_render() {
        let heatmap = create_heatmap(&results(), None, None, None, GENE_NAME_COLUMN).unwrap();
        assert!(heatmap_svg(&heatmap).render().contains("CNTNAP2"));
        assert!(enrichment_bar_svg(&results(), None).render().contains("SYNAPSE"));
    }
}
