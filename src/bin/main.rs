use std::path::PathBuf;

use correct_kinematics::{Calibration, Corrector, KinematicsLoader};
use itertools::Itertools;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "correct-kinematics",
    about = "PSF beam-smearing corrections for observed galaxy kinematics"
)]
struct Opt {
    /// Path to the CSV file with the observed galaxy kinematics
    #[structopt(short, long)]
    infile: PathBuf,
    /// Path to the output CSV file with the corrected kinematics appended
    #[structopt(short, long)]
    outfile: PathBuf,
    /// Path to a JSON file overriding the correction calibration constants
    #[structopt(long)]
    calibration: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let opt = Opt::from_args();

    let mut table = KinematicsLoader::default().data_path(&opt.infile).load()?;

    let mut corrector = Corrector::default();
    if let Some(path) = &opt.calibration {
        corrector = corrector.calibration(Calibration::load(path)?);
    }
    let corrected = corrector.correct(&mut table)?;

    table.to_csv(&opt.outfile)?;
    println!(
        "corrected {} for {} galaxies, written to {:?}",
        corrected.iter().map(|s| s.to_string()).join(", "),
        table.len(),
        opt.outfile
    );

    Ok(())
}
