//! Terminal plots.

pub mod ascii;

pub use ascii::{find_fit, render_ascii_plot, render_fit};
