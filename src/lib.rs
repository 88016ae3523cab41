//! nimagen: neuroimaging genetics association testing
//!
//! This library tests every genetic variant of a PLINK binary fileset against
//! imaging phenotypes (e.g. regional brain volumes) with a linear model, checks
//! how stable the significant associations are under resampling of subjects,
//! and summarises the results as genes, enriched gene sets and brain maps.
//!
//! The main components of this library are:
//! - `BedFile` and `Table`: Genotype and subject-level data loading
//! - `MassUnivariate`: Per-variant linear association with covariates
//! - `StabilityTest`: Resampling based robustness of the associations
//! - `annotate_snps` and `ora`: SNP to gene annotation and gene-set enrichment
//! - `Atlas` and `plot_segmentation`: Brain maps of region-level values
//! - `geneset` and `plots`: SVG figures of enrichment results and subject data

mod annotation;
mod atlas;
mod brainmap;
mod colormap;
mod config;
mod enrichment;
mod error;
mod math;
mod plink;
mod regression;
mod results;
mod stability;
mod svg;
mod table;
mod utils;

pub mod geneset;
pub mod plots;

pub use annotation::{annotate_snps, read_gene_build, Annotation, GeneAnnotation, GeneLocation, SnpAnnotation};
pub use atlas::{write_roi_coordinates, Atlas, AxisOrientation, LabelLookup, RoiCoordinate};
pub use brainmap::{
    get_edges, plot_segmentation, rot90, Edge, MapView, SegmentationFigure, SegmentationOptions, ViewImage,
};
pub use colormap::{ColorScale, Colormap, Rgb};
pub use config::{CorrectionConfig, ResampleScheme, Scaling, StabilityConfig, ThresholdDirection};
pub use enrichment::{
    hypergeometric_test, ora, read_gene_list, read_gmt, EnrichmentResult, EnrichmentResults, GeneSet, Ora, Overlap,
};
pub use error::{Error, Result};
pub use plink::{read_fid_list, BedFile, Individual, Variant};
pub use regression::{fit_variant, mass_univariate_test, AssociationDesign, MassUnivariate, VariantFit};
pub use results::{AssociationResult, AssociationResults, RegionValue};
pub use stability::{StabilityResult, StabilityResults, StabilityTest};
pub use svg::{Anchor, Document};
pub use table::{Delimiter, Table, FID};
