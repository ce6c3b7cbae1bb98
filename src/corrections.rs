use std::{fmt, fs::File, path::Path};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::table::{KinematicsTable, TableError};

/// Ratio between the FWHM and the standard deviation of a Gaussian PSF
pub const FWHM_TO_SIGMA: f64 = 2.355;

#[derive(thiserror::Error, Debug)]
pub enum CorrectionError {
    #[error("no blurring information available, provide the measurement radius (\"Re\") and the PSF FWHM (\"fwhm\"), or the ratio sigma_PSF / Re (\"psf_over_re\")")]
    MissingBlurInfo,
    #[error("no kinematic information available, provide observed lambda_R (\"obs_lr\"), observed elliptical lambda_R (\"obs_elr\") or observed V/sigma (\"obs_vsig\")")]
    MissingKinematicInfo,
    #[error("no shape information available, provide the {1} ({0:?}) column")]
    MissingShapeInfo(&'static str, &'static str),
    #[error("column {column:?}, row {row}: {value} is outside the correction domain")]
    Domain {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("Failed to open the calibration file")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the calibration file")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Kinematic statistics the engine knows how to deblur
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum Statistic {
    LambdaR,
    EllipticalLambdaR,
    VOverSigma,
}
impl Statistic {
    /// Observed column name
    pub fn observed(self) -> &'static str {
        match self {
            Statistic::LambdaR => "obs_lr",
            Statistic::EllipticalLambdaR => "obs_elr",
            Statistic::VOverSigma => "obs_vsig",
        }
    }
    /// Corrected column name
    pub fn corrected(self) -> &'static str {
        match self {
            Statistic::LambdaR => "corr_lr",
            Statistic::EllipticalLambdaR => "corr_elr",
            Statistic::VOverSigma => "corr_vsig",
        }
    }
}
impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::LambdaR => write!(f, "lambda_R"),
            Statistic::EllipticalLambdaR => write!(f, "elliptical lambda_R"),
            Statistic::VOverSigma => write!(f, "V/sigma"),
        }
    }
}

/// Calibration of the deblurring correction for one kinematic statistic
///
/// The observed statistic is deblurred in log space by the offset
/// `psf_term + shape_scale * psf_over_re * shape_term`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConstants {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub w_ellipticity: f64,
    pub w_sersic: f64,
    pub w_radius: f64,
    pub zero_point: f64,
    /// Weight of the shape term in the total offset, 3 for V/sigma and 1 otherwise
    #[serde(default = "default_shape_scale")]
    pub shape_scale: f64,
    /// Feed `log10(e)` instead of `e` to the shape term (elliptical lambda_R)
    #[serde(default)]
    pub log_ellipticity: bool,
}
fn default_shape_scale() -> f64 {
    1.
}
impl CorrectionConstants {
    /// Nonlinear PSF-ratio term (`f1`), zero for an unblurred observation
    pub fn psf_term(&self, psf_over_re: f64) -> f64 {
        self.a / (1. + (self.b * psf_over_re.powf(self.c) + self.d).exp())
            - self.a / (1. + self.d.exp())
    }
    /// Linear shape/geometry term (`f2`)
    pub fn shape_term(&self, ellipticity: f64, sersic: f64, reff_fac: f64) -> f64 {
        let e = if self.log_ellipticity {
            ellipticity.log10()
        } else {
            ellipticity
        };
        self.w_ellipticity * e + self.w_sersic * sersic.log10() + self.w_radius * reff_fac
            + self.zero_point
    }
    /// Log-space offset between the observed and the deblurred statistic
    pub fn delta(&self, psf_over_re: f64, ellipticity: f64, sersic: f64, reff_fac: f64) -> f64 {
        self.psf_term(psf_over_re)
            + self.shape_scale * psf_over_re * self.shape_term(ellipticity, sersic, reff_fac)
    }
    /// Deblurred statistic
    ///
    /// Preconditions: positive observed value and Sersic index, non-negative
    /// `psf_over_re`, positive ellipticity when `log_ellipticity` is set.
    pub fn correct(
        &self,
        observed: f64,
        psf_over_re: f64,
        ellipticity: f64,
        sersic: f64,
        reff_fac: f64,
    ) -> f64 {
        10f64.powf(observed.log10() - self.delta(psf_over_re, ellipticity, sersic, reff_fac))
    }
}

/// Calibration constants for the three statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub lambda_r: CorrectionConstants,
    pub elliptical_lambda_r: CorrectionConstants,
    pub v_over_sigma: CorrectionConstants,
}
impl Default for Calibration {
    fn default() -> Self {
        Self {
            lambda_r: CorrectionConstants {
                a: 7.48,
                b: 4.08,
                c: 1.60,
                d: 2.89,
                w_ellipticity: 0.10033595,
                w_sersic: -0.22313183,
                w_radius: -0.12270405,
                zero_point: 0.2188,
                shape_scale: 1.,
                log_ellipticity: false,
            },
            elliptical_lambda_r: CorrectionConstants {
                a: 7.49,
                b: 4.01,
                c: 1.57,
                d: 2.84,
                w_ellipticity: 0.01638699,
                w_sersic: -0.19020806,
                w_radius: -0.13429812,
                zero_point: 0.27955548,
                shape_scale: 1.,
                log_ellipticity: true,
            },
            v_over_sigma: CorrectionConstants {
                a: 7.55,
                b: 4.42,
                c: 1.55,
                d: 2.73,
                w_ellipticity: -0.10142709,
                w_sersic: 0.02407725,
                w_radius: -0.05636119,
                zero_point: 0.11757231,
                shape_scale: 3.,
                log_ellipticity: false,
            },
        }
    }
}
impl Calibration {
    /// Loads an alternative calibration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CorrectionError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
    pub fn constants(&self, statistic: Statistic) -> &CorrectionConstants {
        match statistic {
            Statistic::LambdaR => &self.lambda_r,
            Statistic::EllipticalLambdaR => &self.elliptical_lambda_r,
            Statistic::VOverSigma => &self.v_over_sigma,
        }
    }
}

/// Applies the deblurring corrections to a whole kinematics table
#[derive(Default, Debug, Clone)]
pub struct Corrector {
    calibration: Calibration,
}
impl Corrector {
    pub fn calibration(self, calibration: Calibration) -> Self {
        Self { calibration }
    }
    /// Corrects every observed statistic present in the table
    ///
    /// Derives `psf_over_re` from `Re` and `fwhm` when absent and fills
    /// `Reff_fac` with 1 when absent, then appends one corrected column per
    /// observed statistic. Returns the corrected statistics.
    pub fn correct(&self, table: &mut KinematicsTable) -> Result<Vec<Statistic>, CorrectionError> {
        self.validate(table)?;

        if !table.has_column("psf_over_re") {
            let psf_over_re = derive_psf_ratio(table)?;
            table.assign("psf_over_re", psf_over_re);
        }
        if !table.has_column("Reff_fac") {
            log::warn!(
                "no measurement radius factor (\"Reff_fac\") column, \
                 assuming observations made at 1 Reff"
            );
            table.assign("Reff_fac", vec![1f64; table.len()]);
        }

        let ellipticity = table.column("e")?;
        let sersic = table.column("n")?;
        let psf_over_re = table.column("psf_over_re")?;
        let reff_fac = table.column("Reff_fac")?;

        let present: Vec<Statistic> = Statistic::iter()
            .filter(|s| table.has_column(s.observed()))
            .collect();
        let mut corrected = vec![];
        for statistic in present {
            let observed = table.column(statistic.observed())?;
            let constants = self.calibration.constants(statistic);
            let values = (0..table.len())
                .into_par_iter()
                .map(|row| {
                    let domain = |column: &str, value: f64| CorrectionError::Domain {
                        column: column.to_string(),
                        row,
                        value,
                    };
                    if observed[row] <= 0. {
                        return Err(domain(statistic.observed(), observed[row]));
                    }
                    if sersic[row] <= 0. {
                        return Err(domain("n", sersic[row]));
                    }
                    if psf_over_re[row] < 0. {
                        return Err(domain("psf_over_re", psf_over_re[row]));
                    }
                    if constants.log_ellipticity && ellipticity[row] <= 0. {
                        return Err(domain("e", ellipticity[row]));
                    }
                    Ok(constants.correct(
                        observed[row],
                        psf_over_re[row],
                        ellipticity[row],
                        sersic[row],
                        reff_fac[row],
                    ))
                })
                .collect::<Result<Vec<f64>, CorrectionError>>()?;
            table.assign(statistic.corrected(), values);
            corrected.push(statistic);
        }
        log::info!(
            "corrected {} statistic(s) for {} galaxies",
            corrected.len(),
            table.len()
        );
        Ok(corrected)
    }
    fn validate(&self, table: &KinematicsTable) -> Result<(), CorrectionError> {
        if !table.has_column("psf_over_re")
            && !(table.has_column("Re") && table.has_column("fwhm"))
        {
            return Err(CorrectionError::MissingBlurInfo);
        }
        if Statistic::iter().all(|s| !table.has_column(s.observed())) {
            return Err(CorrectionError::MissingKinematicInfo);
        }
        if !table.has_column("e") {
            return Err(CorrectionError::MissingShapeInfo(
                "e",
                "measurement ellipticity",
            ));
        }
        if !table.has_column("n") {
            return Err(CorrectionError::MissingShapeInfo("n", "Sersic index"));
        }
        Ok(())
    }
}

/// `sigma_PSF / Re` from the PSF FWHM and the measurement radius
fn derive_psf_ratio(table: &KinematicsTable) -> Result<Vec<f64>, CorrectionError> {
    let radius = table.column("Re")?;
    let fwhm = table.column("fwhm")?;
    radius
        .iter()
        .zip(&fwhm)
        .enumerate()
        .map(|(row, (&radius, &fwhm))| {
            if radius <= 0. {
                return Err(CorrectionError::Domain {
                    column: "Re".to_string(),
                    row,
                    value: radius,
                });
            }
            Ok((fwhm / FWHM_TO_SIGMA) / radius)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_blur_no_correction() {
        let calibration = Calibration::default();
        for statistic in Statistic::iter() {
            let corrected = calibration
                .constants(statistic)
                .correct(0.4, 0., 0.3, 2., 1.);
            assert!((corrected - 0.4).abs() < 1e-12, "{}", statistic);
        }
    }

    #[test]
    fn lambda_r_regression() {
        let corrected = Calibration::default()
            .constants(Statistic::LambdaR)
            .correct(0.4, 0.2, 0.3, 2., 1.);
        let f1 = 7.48 / (1. + (4.08 * 0.2f64.powf(1.60) + 2.89f64).exp())
            - 7.48 / (1. + 2.89f64.exp());
        let f2 = 0.10033595 * 0.3 - 0.22313183 * 2f64.log10() - 0.12270405 + 0.2188;
        let expected = 10f64.powf(0.4f64.log10() - (f1 + 0.2 * f2));
        assert!((corrected - expected).abs() < 1e-14);
        assert!((corrected - 0.49126).abs() < 1e-3);
    }

    #[test]
    fn elliptical_lambda_r_uses_log_ellipticity() {
        let corrected = Calibration::default()
            .constants(Statistic::EllipticalLambdaR)
            .correct(0.4, 0.2, 0.3, 2., 1.);
        let f1 = 7.49 / (1. + (4.01 * 0.2f64.powf(1.57) + 2.84f64).exp())
            - 7.49 / (1. + 2.84f64.exp());
        let f2 = 0.01638699 * 0.3f64.log10() - 0.19020806 * 2f64.log10() - 0.13429812
            + 0.27955548;
        let expected = 10f64.powf(0.4f64.log10() - (f1 + 0.2 * f2));
        assert!((corrected - expected).abs() < 1e-14);
    }

    #[test]
    fn v_over_sigma_triples_the_shape_term() {
        let corrected = Calibration::default()
            .constants(Statistic::VOverSigma)
            .correct(0.4, 0.2, 0.3, 2., 1.);
        let f1 = 7.55 / (1. + (4.42 * 0.2f64.powf(1.55) + 2.73f64).exp())
            - 7.55 / (1. + 2.73f64.exp());
        let f2 = -0.10142709 * 0.3 + 0.02407725 * 2f64.log10() - 0.05636119 + 0.11757231;
        let expected = 10f64.powf(0.4f64.log10() - (f1 + 3. * 0.2 * f2));
        assert!((corrected - expected).abs() < 1e-14);
    }

    #[test]
    fn corrected_iff_observed() {
        let mut table = KinematicsTable::from_columns(vec![
            ("e", vec![0.3]),
            ("n", vec![2.]),
            ("psf_over_re", vec![0.2]),
            ("obs_lr", vec![0.4]),
            ("obs_vsig", vec![0.6]),
        ]);
        let corrected = Corrector::default().correct(&mut table).unwrap();
        assert_eq!(corrected, vec![Statistic::LambdaR, Statistic::VOverSigma]);
        assert!(table.has_column("corr_lr"));
        assert!(table.has_column("corr_vsig"));
        assert!(!table.has_column("corr_elr"));
    }

    #[test]
    fn psf_ratio_derivation() {
        let mut table = KinematicsTable::from_columns(vec![
            ("e", vec![0.3]),
            ("n", vec![2.]),
            ("Re", vec![2.]),
            ("fwhm", vec![2.355]),
            ("obs_lr", vec![0.4]),
        ]);
        Corrector::default().correct(&mut table).unwrap();
        assert_eq!(table.column("psf_over_re").unwrap(), vec![0.5]);
    }

    #[test]
    fn default_radius_factor_is_one() {
        let mut bare = KinematicsTable::from_columns(vec![
            ("e", vec![0.3, 0.5]),
            ("n", vec![2., 1.5]),
            ("psf_over_re", vec![0.2, 0.35]),
            ("obs_lr", vec![0.4, 0.25]),
        ]);
        let mut explicit = KinematicsTable::from_columns(vec![
            ("e", vec![0.3, 0.5]),
            ("n", vec![2., 1.5]),
            ("psf_over_re", vec![0.2, 0.35]),
            ("obs_lr", vec![0.4, 0.25]),
            ("Reff_fac", vec![1., 1.]),
        ]);
        Corrector::default().correct(&mut bare).unwrap();
        Corrector::default().correct(&mut explicit).unwrap();
        assert_eq!(
            bare.column("corr_lr").unwrap(),
            explicit.column("corr_lr").unwrap()
        );
    }

    #[test]
    fn missing_shape_info() {
        let mut table = KinematicsTable::from_columns(vec![
            ("n", vec![2.]),
            ("psf_over_re", vec![0.2]),
            ("obs_lr", vec![0.4]),
        ]);
        assert!(matches!(
            Corrector::default().correct(&mut table),
            Err(CorrectionError::MissingShapeInfo("e", _))
        ));
        assert!(!table.has_column("corr_lr"));
    }

    #[test]
    fn missing_blur_info() {
        let mut table = KinematicsTable::from_columns(vec![
            ("e", vec![0.3]),
            ("n", vec![2.]),
            ("obs_lr", vec![0.4]),
        ]);
        assert!(matches!(
            Corrector::default().correct(&mut table),
            Err(CorrectionError::MissingBlurInfo)
        ));
    }

    #[test]
    fn missing_kinematic_info() {
        let mut table = KinematicsTable::from_columns(vec![
            ("e", vec![0.3]),
            ("n", vec![2.]),
            ("psf_over_re", vec![0.2]),
        ]);
        assert!(matches!(
            Corrector::default().correct(&mut table),
            Err(CorrectionError::MissingKinematicInfo)
        ));
    }

    #[test]
    fn non_positive_observed_value() {
        let mut table = KinematicsTable::from_columns(vec![
            ("e", vec![0.3, 0.3]),
            ("n", vec![2., 2.]),
            ("psf_over_re", vec![0.2, 0.2]),
            ("obs_lr", vec![0.4, 0.]),
        ]);
        assert!(matches!(
            Corrector::default().correct(&mut table),
            Err(CorrectionError::Domain { column, row: 1, .. }) if column == "obs_lr"
        ));
    }

    #[test]
    fn calibration_json_round_trip() {
        let calibration = Calibration::default();
        let json = serde_json::to_string(&calibration).unwrap();
        let reloaded: Calibration = serde_json::from_str(&json).unwrap();
        assert_eq!(calibration, reloaded);
    }

    #[test]
    fn end_to_end_csv() {
        let infile = std::env::temp_dir().join("correct-kinematics-e2e-in.csv");
        let outfile = std::env::temp_dir().join("correct-kinematics-e2e-out.csv");
        std::fs::write(
            &infile,
            "galaxy,e,n,psf_over_re,obs_lr\nNGC1052,0.3,2.0,0.2,0.4\n",
        )
        .unwrap();
        let mut table = crate::table::KinematicsLoader::default()
            .data_path(&infile)
            .load()
            .unwrap();
        Corrector::default().correct(&mut table).unwrap();
        table.to_csv(&outfile).unwrap();
        let contents = std::fs::read_to_string(&outfile).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "galaxy,e,n,psf_over_re,obs_lr,Reff_fac,corr_lr"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("NGC1052,0.3,2.0,0.2,0.4,1,0.491"), "{}", row);
    }
}
