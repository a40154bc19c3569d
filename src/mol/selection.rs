//! Spin identification strings.
//!
//! A selection string addresses molecules, residues and spins:
//!
//! ```text
//! #Ap4Aase:2-10,15@N,H     residues 2..10 and 15 of Ap4Aase, spins N and H
//! :Glu & @CA                CA spins of glutamates
//! #RNA | :1                 all of RNA plus residue 1 of any molecule
//! ```
//!
//! The molecule token follows `#`, the residue token follows `:` and the spin
//! token follows `@`. Tokens are comma-separated lists of numbers, ranges
//! (`a-b`) and names (which may contain `*` wildcards). Two selections joined
//! by `&` or `|` form an intersection or union; the rightmost operator binds
//! last.

use std::fmt;

use regex::Regex;
use tracing::debug;

use crate::error::{RelaxError, Result};

/// One element of a parsed token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdElement {
    Num(i64),
    Name(String),
}

impl IdElement {
    fn matches(&self, num: Option<i64>, name: Option<&str>) -> bool {
        match self {
            IdElement::Num(n) => num == Some(*n),
            IdElement::Name(pattern) => name.is_some_and(|s| wildcard_match(pattern, s)),
        }
    }
}

impl fmt::Display for IdElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdElement::Num(n) => write!(f, "{n}"),
            IdElement::Name(s) => f.write_str(s),
        }
    }
}

/// Raw molecule, residue and spin tokens of a selection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tokens {
    pub mol: Option<String>,
    pub res: Option<String>,
    pub spin: Option<String>,
}

/// Split a selection string into its molecule, residue and spin tokens.
pub fn tokenise(selection: &str) -> Result<Tokens> {
    let atom_split: Vec<&str> = selection.split('@').collect();
    if atom_split.len() > 2 {
        return Err(RelaxError::selection(
            selection,
            "only one '@' character is allowed",
        ));
    }
    let spin = match atom_split.get(1) {
        None => None,
        Some(rest) if rest.contains(':') => {
            return Err(RelaxError::selection(
                selection,
                "the spin identifier '@' must come after the residue identifier ':'",
            ));
        }
        Some(rest) if rest.contains('#') => {
            return Err(RelaxError::selection(
                selection,
                "the spin identifier '@' must come after the molecule identifier '#'",
            ));
        }
        Some(rest) => Some(rest.trim().to_string()),
    };

    let res_split: Vec<&str> = atom_split[0].split(':').collect();
    if res_split.len() > 2 {
        return Err(RelaxError::selection(
            selection,
            "only one ':' character is allowed",
        ));
    }
    let res = match res_split.get(1) {
        None => None,
        Some(rest) if rest.contains('#') => {
            return Err(RelaxError::selection(
                selection,
                "the residue identifier ':' must come after the molecule identifier '#'",
            ));
        }
        Some(rest) => Some(rest.trim().to_string()),
    };

    let mol_split: Vec<&str> = res_split[0].split('#').collect();
    if mol_split.len() > 2 {
        return Err(RelaxError::selection(
            selection,
            "only one '#' character is allowed",
        ));
    }
    if !mol_split[0].trim().is_empty() {
        return Err(RelaxError::selection(
            selection,
            "the string must start with '#', ':' or '@'",
        ));
    }
    let mol = mol_split.get(1).map(|s| s.trim().to_string());

    if mol.is_none() && res.is_none() && spin.is_none() {
        return Err(RelaxError::selection(selection, "no identifier found"));
    }

    Ok(Tokens { mol, res, spin })
}

/// Parse a token into a sorted list of numbers and names.
///
/// Ranges such as `1-5` or `-10--5` expand into every integer in between.
/// An element with a dash that is not a valid range, such as `N-dom` or
/// `5-1`, is a plain name.
pub fn parse_token(token: &str) -> Result<Vec<IdElement>> {
    let mut list = Vec::new();

    for element in token.split(',') {
        let element = element.trim();
        if element.is_empty() {
            return Err(RelaxError::selection(token, "empty element in the list"));
        }

        // A leading '-' is a sign, any later one marks a range.
        let first = element.chars().next().map_or(0, char::len_utf8);
        let tail = &element[first..];
        if let Some(pos) = tail.find('-') {
            match range_bounds(element, first + pos, tail.matches('-').count()) {
                Some((start, end)) => list.extend((start..=end).map(IdElement::Num)),
                None => {
                    debug!(element, "Not a valid range, the '-' is kept as part of the name");
                    list.push(IdElement::Name(element.to_string()));
                }
            }
        } else if let Ok(n) = element.parse::<i64>() {
            list.push(IdElement::Num(n));
        } else {
            list.push(IdElement::Name(element.to_string()));
        }
    }

    list.sort();
    list.dedup();
    Ok(list)
}

/// Bounds of a numeric range split at byte `split`.
///
/// `None` when there are more than two dashes after the first character, an
/// end is not an integer, or the start is not below the end.
fn range_bounds(element: &str, split: usize, dashes: usize) -> Option<(i64, i64)> {
    if dashes > 2 {
        return None;
    }
    let start: i64 = element[..split].parse().ok()?;
    let end: i64 = element[split + 1..].parse().ok()?;
    (start < end).then_some((start, end))
}

/// A parsed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Matches everything.
    All,
    Tokens {
        mol: Option<Vec<IdElement>>,
        res: Option<Vec<IdElement>>,
        spin: Option<Vec<IdElement>>,
    },
    And(Box<Selection>, Box<Selection>),
    Or(Box<Selection>, Box<Selection>),
}

impl Selection {
    /// Parse a selection string. An empty string selects everything.
    pub fn parse(selection: &str) -> Result<Self> {
        let trimmed = selection.trim();
        if trimmed.is_empty() {
            return Ok(Selection::All);
        }

        if let Some(pos) = trimmed.rfind(['&', '|']) {
            let (left, right) = (&trimmed[..pos], &trimmed[pos + 1..]);
            if left.trim().is_empty() || right.trim().is_empty() {
                return Err(RelaxError::selection(
                    selection,
                    "a boolean operator needs a selection on both sides",
                ));
            }
            let left = Box::new(Selection::parse(left)?);
            let right = Box::new(Selection::parse(right)?);
            return Ok(if trimmed.as_bytes()[pos] == b'&' {
                Selection::And(left, right)
            } else {
                Selection::Or(left, right)
            });
        }

        let tokens = tokenise(trimmed)?;
        let parse = |t: Option<String>| t.as_deref().map(parse_token).transpose();
        Ok(Selection::Tokens {
            mol: parse(tokens.mol)?,
            res: parse(tokens.res)?,
            spin: parse(tokens.spin)?,
        })
    }

    /// Parse an optional selection string, `None` selecting everything.
    pub fn from_opt(selection: Option<&str>) -> Result<Self> {
        selection.map_or(Ok(Selection::All), Selection::parse)
    }

    pub fn contains_mol(&self, mol_name: Option<&str>) -> bool {
        match self {
            Selection::All => true,
            Selection::Tokens { mol, .. } => token_matches(mol, None, mol_name),
            Selection::And(a, b) => a.contains_mol(mol_name) && b.contains_mol(mol_name),
            Selection::Or(a, b) => a.contains_mol(mol_name) || b.contains_mol(mol_name),
        }
    }

    pub fn contains_res(&self, mol_name: Option<&str>, res_num: Option<i64>, res_name: Option<&str>) -> bool {
        match self {
            Selection::All => true,
            Selection::Tokens { mol, res, .. } => {
                token_matches(mol, None, mol_name) && token_matches(res, res_num, res_name)
            }
            Selection::And(a, b) => {
                a.contains_res(mol_name, res_num, res_name) && b.contains_res(mol_name, res_num, res_name)
            }
            Selection::Or(a, b) => {
                a.contains_res(mol_name, res_num, res_name) || b.contains_res(mol_name, res_num, res_name)
            }
        }
    }

    /// True when the selection matches the spin with this full address.
    pub fn contains_spin(
        &self,
        mol_name: Option<&str>,
        res_num: Option<i64>,
        res_name: Option<&str>,
        spin_num: Option<i64>,
        spin_name: Option<&str>,
    ) -> bool {
        match self {
            Selection::All => true,
            Selection::Tokens { mol, res, spin } => {
                token_matches(mol, None, mol_name)
                    && token_matches(res, res_num, res_name)
                    && token_matches(spin, spin_num, spin_name)
            }
            Selection::And(a, b) => {
                a.contains_spin(mol_name, res_num, res_name, spin_num, spin_name)
                    && b.contains_spin(mol_name, res_num, res_name, spin_num, spin_name)
            }
            Selection::Or(a, b) => {
                a.contains_spin(mol_name, res_num, res_name, spin_num, spin_name)
                    || b.contains_spin(mol_name, res_num, res_name, spin_num, spin_name)
            }
        }
    }

    /// True if any part of the selection names residues or spins.
    pub fn has_res_or_spin_tokens(&self) -> bool {
        match self {
            Selection::All => false,
            Selection::Tokens { res, spin, .. } => res.is_some() || spin.is_some(),
            Selection::And(a, b) | Selection::Or(a, b) => {
                a.has_res_or_spin_tokens() || b.has_res_or_spin_tokens()
            }
        }
    }

    /// True if any part of the selection names spins.
    pub fn has_spin_tokens(&self) -> bool {
        match self {
            Selection::All => false,
            Selection::Tokens { spin, .. } => spin.is_some(),
            Selection::And(a, b) | Selection::Or(a, b) => a.has_spin_tokens() || b.has_spin_tokens(),
        }
    }
}

fn token_matches(token: &Option<Vec<IdElement>>, num: Option<i64>, name: Option<&str>) -> bool {
    match token {
        None => true,
        Some(list) => list.iter().any(|e| match e {
            // Molecules only have names, so numeric elements compare as text.
            IdElement::Num(n) if num.is_none() => name.is_some_and(|s| s == n.to_string()),
            _ => e.matches(num, name),
        }),
    }
}

/// Anchored regular expression of a glob pattern: `*` is any run, `?` any one character.
pub fn wildcard_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::from("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// Glob-style matching supporting `*` (any run) and `?` (any one character).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == text;
    }
    wildcard_regex(pattern).is_ok_and(|re| re.is_match(text))
}

/// Build the canonical spin ID string.
///
/// Residues are identified by number when available and spins by name, e.g.
/// `#Ap4Aase:2@N`.
pub fn generate_spin_id(
    mol_name: Option<&str>,
    res_num: Option<i64>,
    res_name: Option<&str>,
    spin_num: Option<i64>,
    spin_name: Option<&str>,
) -> String {
    let mut id = String::new();
    if let Some(mol) = mol_name {
        id.push('#');
        id.push_str(mol);
    }
    if let Some(num) = res_num {
        id.push_str(&format!(":{num}"));
    } else if let Some(name) = res_name {
        id.push(':');
        id.push_str(name);
    }
    if let Some(name) = spin_name {
        id.push('@');
        id.push_str(name);
    } else if let Some(num) = spin_num {
        id.push_str(&format!("@{num}"));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> IdElement {
        IdElement::Num(n)
    }

    fn name(s: &str) -> IdElement {
        IdElement::Name(s.to_string())
    }

    #[test]
    fn tokenise_full_string() {
        let t = tokenise("#Ap4Aase:2-10@N,H").unwrap();
        assert_eq!(t.mol.as_deref(), Some("Ap4Aase"));
        assert_eq!(t.res.as_deref(), Some("2-10"));
        assert_eq!(t.spin.as_deref(), Some("N,H"));

        let t = tokenise(":5").unwrap();
        assert_eq!(t.mol, None);
        assert_eq!(t.res.as_deref(), Some("5"));
        assert_eq!(t.spin, None);
    }

    #[test]
    fn tokenise_rejects_bad_strings() {
        for bad in ["@N@C", "::1", "##a", "@N:1", "@N#a", ":1#a", "N", "abc:1"] {
            assert!(tokenise(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn parse_token_numbers_ranges_and_names() {
        assert_eq!(parse_token("1").unwrap(), vec![num(1)]);
        assert_eq!(parse_token("3-5, 1").unwrap(), vec![num(1), num(3), num(4), num(5)]);
        assert_eq!(parse_token("-6--4").unwrap(), vec![num(-6), num(-5), num(-4)]);
        assert_eq!(parse_token("-2-1").unwrap(), vec![num(-2), num(-1), num(0), num(1)]);
        assert_eq!(parse_token("N,CA,2").unwrap(), vec![num(2), name("CA"), name("N")]);
    }

    #[test]
    fn dashed_names_that_are_not_ranges() {
        assert_eq!(parse_token("N-dom").unwrap(), vec![name("N-dom")]);
        assert_eq!(parse_token("5-1").unwrap(), vec![name("5-1")]);
        assert_eq!(parse_token("1-1").unwrap(), vec![name("1-1")]);
        assert_eq!(parse_token("1-2-3").unwrap(), vec![name("1-2-3")]);
        assert_eq!(parse_token("-1--2--3").unwrap(), vec![name("-1--2--3")]);
        assert_eq!(parse_token("a-b, 2").unwrap(), vec![num(2), name("a-b")]);

        let sel = Selection::parse("#N-dom:2").unwrap();
        assert!(sel.contains_spin(Some("N-dom"), Some(2), None, None, Some("N")));
        assert!(!sel.contains_spin(Some("N"), Some(2), None, None, Some("N")));
    }

    #[test]
    fn parse_token_errors() {
        assert!(parse_token("1,,2").is_err());
        assert!(parse_token(" , ").is_err());
    }

    #[test]
    fn simple_selection_matching() {
        let sel = Selection::parse("#Ap4Aase:2@NH").unwrap();
        assert!(sel.contains_spin(Some("Ap4Aase"), Some(2), Some("Glu"), Some(63), Some("NH")));
        assert!(!sel.contains_spin(Some("RNA"), Some(2), None, None, Some("NH")));
        assert!(!sel.contains_spin(Some("Ap4Aase"), Some(1), None, Some(60), Some("NH")));
        assert!(sel.contains_mol(Some("Ap4Aase")));
        assert!(!sel.contains_mol(Some("RNA")));
    }

    #[test]
    fn residues_match_by_number_or_name() {
        let sel = Selection::parse(":Glu,4").unwrap();
        assert!(sel.contains_res(None, Some(2), Some("Glu")));
        assert!(sel.contains_res(None, Some(4), Some("Pro")));
        assert!(!sel.contains_res(None, Some(1), None));
    }

    #[test]
    fn boolean_operators() {
        let and = Selection::parse(":-5 & @N5").unwrap();
        assert!(and.contains_spin(Some("RNA"), Some(-5), None, None, Some("N5")));
        assert!(!and.contains_spin(Some("RNA"), Some(-5), None, None, Some("C8")));

        // A union is evaluated on whole addresses, not token by token.
        let or = Selection::parse(":1@N | :2@H").unwrap();
        assert!(or.contains_spin(None, Some(1), None, None, Some("N")));
        assert!(or.contains_spin(None, Some(2), None, None, Some("H")));
        assert!(!or.contains_spin(None, Some(1), None, None, Some("H")));

        assert!(Selection::parse(":1 &").is_err());
    }

    #[test]
    fn empty_selection_matches_everything() {
        let sel = Selection::parse("  ").unwrap();
        assert_eq!(sel, Selection::All);
        assert!(sel.contains_spin(None, None, None, None, None));
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match("C*", "C8"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("H?", "HN"));
        assert!(!wildcard_match("H?", "H"));
        assert!(!wildcard_match("N", "N5"));
        assert!(wildcard_match("N-d?m", "N-dom"));
        assert!(wildcard_match("C.*", "C.*"));
        assert!(!wildcard_match("C.*", "CA"));
        assert!(wildcard_regex("(*").unwrap().is_match("(x"));
        let sel = Selection::parse("@C*").unwrap();
        assert!(sel.contains_spin(None, None, None, None, Some("CA")));
        assert!(!sel.contains_spin(None, None, None, None, Some("N")));
    }

    #[test]
    fn spin_ids() {
        assert_eq!(
            generate_spin_id(Some("Ap4Aase"), Some(2), Some("Glu"), Some(63), Some("NH")),
            "#Ap4Aase:2@NH"
        );
        assert_eq!(generate_spin_id(None, None, Some("Glu"), Some(3), None), ":Glu@3");
        assert_eq!(generate_spin_id(None, Some(7), None, None, None), ":7");
    }
}
