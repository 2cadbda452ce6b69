pub mod dataset;
pub mod errors;
pub mod float;
pub mod params;
pub mod run;
pub mod trainer;
pub mod trial;

pub use dataset::*;
pub use errors::*;
pub use params::*;
pub use run::*;
pub use trainer::*;
pub use trial::*;
