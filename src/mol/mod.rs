//! Molecule/residue/spin data model and the spin identification language.

pub mod containers;
pub mod selection;

pub use containers::*;
pub use selection::{IdElement, Selection, Tokens, generate_spin_id, parse_token, tokenise, wildcard_match};
