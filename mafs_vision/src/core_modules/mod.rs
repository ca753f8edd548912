pub mod band;
pub mod components;
pub mod contrast;
pub mod detection;
pub mod filters;
pub mod job;
pub mod morphology;
pub mod raster;
pub mod threshold;
