//! Input/output helpers.
//!
//! - column-oriented text files (`columns`)
//! - sequence and deselection files (`sequence`)
//! - Sparky / generic peak lists (`peaks`)
//! - R2eff / R1rho files (`r2eff`)
//! - TOML experiment set-up (`setup`)
//! - results JSON, CSV export and Grace plots (`results`, `export`, `grace`)

pub mod columns;
pub mod export;
pub mod grace;
pub mod peaks;
pub mod r2eff;
pub mod results;
pub mod sequence;
pub mod setup;

pub use export::*;
pub use grace::*;
pub use peaks::*;
pub use r2eff::*;
pub use results::*;
pub use sequence::*;
pub use setup::*;
