#[cfg(feature = "parallel")]
macro_rules! into_iter {
    ($v:expr) => {
        $v.into_par_iter()
    };
}

#[cfg(not(feature = "parallel"))]
macro_rules! into_iter {
    ($v:expr) => {
        $v.into_iter()
    };
}

pub mod blend;
pub mod border;
pub mod builder;
pub mod constraint;
pub mod coord;
pub mod dem;
pub mod error;
pub mod export;
pub mod insertion;
pub mod landuse;
pub mod mesh;
pub mod refine;
pub mod terrain;
mod utils;
pub mod water;

/// Scalar type.
pub type Scalar = f64;

pub mod prelude {
    pub use crate::{
        blend::*, border::*, builder::*, constraint::*, coord::*, dem::*, error::*, export::*,
        insertion::*, landuse::*, mesh::settings::*, mesh::*, refine::*, terrain::*, water::*,
        Scalar,
    };
}
