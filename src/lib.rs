//! PSF beam-smearing corrections for observed galaxy kinematics
//!
//! Seeing-limited integral field observations blur a galaxy image with the
//! instrument point-spread function, biasing spin statistics such as
//! lambda_R and V/sigma low. This crate deblurs them with empirically
//! calibrated analytic corrections: for each statistic, a nonlinear term in
//! the `sigma_PSF / Re` ratio and a linear term in the galaxy shape
//! (ellipticity, Sersic index, measurement radius) are combined in log
//! space and subtracted from the observed value.
//!
//! ```no_run
//! use correct_kinematics::{Corrector, KinematicsLoader};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut table = KinematicsLoader::default()
//!     .data_path("kinematics.csv")
//!     .load()?;
//! Corrector::default().correct(&mut table)?;
//! table.to_csv("kinematics_corrected.csv")?;
//! # Ok(())
//! # }
//! ```

pub mod corrections;
mod error;
pub mod table;

pub use corrections::{
    Calibration, CorrectionConstants, CorrectionError, Corrector, Statistic, FWHM_TO_SIGMA,
};
pub use error::Error;
pub use table::{KinematicsLoader, KinematicsTable, TableError};
