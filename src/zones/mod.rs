pub mod bounds;
pub mod constraint;
pub mod dbm;
pub mod error;
pub mod federation;
pub mod handle;
pub mod matrix;
pub mod mingraph;
pub mod priced;
pub mod priced_federation;
pub mod simplex;
