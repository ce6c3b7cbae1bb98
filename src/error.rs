use crate::{corrections::CorrectionError, table::TableError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `table` module")]
    Table(#[from] TableError),
    #[error("Error in the `corrections` module")]
    Correction(#[from] CorrectionError),
}
