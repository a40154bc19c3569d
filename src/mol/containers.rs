//! Molecule, residue and spin containers.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Isotope;
use crate::error::{RelaxError, Result};
use crate::mol::selection::{Selection, generate_spin_id};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spin {
    pub num: Option<i64>,
    pub name: Option<String>,
    pub isotope: Option<Isotope>,
    pub select: bool,
    /// Chemical shift in ppm.
    pub chemical_shift: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Residue {
    pub num: Option<i64>,
    pub name: Option<String>,
    pub spins: Vec<Spin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub name: Option<String>,
    pub residues: Vec<Residue>,
}

/// Position of a spin inside a `SpinSystem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpinIndex {
    pub mol: usize,
    pub res: usize,
    pub spin: usize,
}

/// A spin together with its parents' identifiers.
#[derive(Debug, Clone, Copy)]
pub struct SpinView<'a> {
    pub index: SpinIndex,
    pub mol_name: Option<&'a str>,
    pub res_num: Option<i64>,
    pub res_name: Option<&'a str>,
    pub spin: &'a Spin,
}

impl SpinView<'_> {
    pub fn id(&self) -> String {
        generate_spin_id(
            self.mol_name,
            self.res_num,
            self.res_name,
            self.spin.num,
            self.spin.name.as_deref(),
        )
    }
}

/// The molecule → residue → spin hierarchy of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpinSystem {
    pub molecules: Vec<Molecule>,
}

impl SpinSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when at least one spin exists.
    pub fn exists_data(&self) -> bool {
        self.molecules
            .iter()
            .any(|m| m.residues.iter().any(|r| !r.spins.is_empty()))
    }

    pub fn create_molecule(&mut self, name: Option<&str>) -> Result<usize> {
        if self.molecules.iter().any(|m| m.name.as_deref() == name) {
            return Err(RelaxError::Duplicate {
                kind: "molecule",
                name: name.unwrap_or("<unnamed>").to_string(),
            });
        }
        self.molecules.push(Molecule {
            name: name.map(str::to_string),
            residues: Vec::new(),
        });
        Ok(self.molecules.len() - 1)
    }

    pub fn create_residue(&mut self, mol: usize, num: Option<i64>, name: Option<&str>) -> Result<usize> {
        let molecule = self
            .molecules
            .get_mut(mol)
            .ok_or_else(|| RelaxError::Argument(format!("no molecule at index {mol}")))?;

        let duplicate = molecule.residues.iter().any(|r| match num {
            Some(n) => r.num == Some(n),
            None => r.num.is_none() && r.name.as_deref() == name,
        });
        if duplicate {
            return Err(RelaxError::Duplicate {
                kind: "residue",
                name: generate_spin_id(molecule.name.as_deref(), num, name, None, None),
            });
        }

        molecule.residues.push(Residue {
            num,
            name: name.map(str::to_string),
            spins: Vec::new(),
        });
        Ok(molecule.residues.len() - 1)
    }

    /// Create a spin, creating the molecule and residue containers as needed.
    pub fn create_spin(
        &mut self,
        mol_name: Option<&str>,
        res_num: Option<i64>,
        res_name: Option<&str>,
        spin_num: Option<i64>,
        spin_name: Option<&str>,
    ) -> Result<SpinIndex> {
        let mol = match self.molecules.iter().position(|m| m.name.as_deref() == mol_name) {
            Some(i) => i,
            None => self.create_molecule(mol_name)?,
        };

        let existing = self.molecules[mol].residues.iter().position(|r| match res_num {
            Some(n) => r.num == Some(n),
            None => r.num.is_none() && r.name.as_deref() == res_name,
        });
        let res = match existing {
            Some(i) => i,
            None => self.create_residue(mol, res_num, res_name)?,
        };

        let residue = &mut self.molecules[mol].residues[res];
        let duplicate = residue
            .spins
            .iter()
            .any(|s| s.num == spin_num && s.name.as_deref() == spin_name);
        if duplicate {
            return Err(RelaxError::Duplicate {
                kind: "spin",
                name: generate_spin_id(mol_name, res_num, res_name, spin_num, spin_name),
            });
        }

        residue.spins.push(Spin {
            num: spin_num,
            name: spin_name.map(str::to_string),
            isotope: None,
            select: true,
            chemical_shift: None,
        });

        Ok(SpinIndex {
            mol,
            res,
            spin: residue.spins.len() - 1,
        })
    }

    /// Iterate over the spins matching a parsed selection, in storage order.
    pub fn spin_loop<'a, 's>(&'a self, selection: &'s Selection) -> impl Iterator<Item = SpinView<'a>> + 's
    where
        'a: 's,
    {
        self.molecules.iter().enumerate().flat_map(move |(mi, mol)| {
            mol.residues.iter().enumerate().flat_map(move |(ri, res)| {
                res.spins.iter().enumerate().filter_map(move |(si, spin)| {
                    let view = SpinView {
                        index: SpinIndex {
                            mol: mi,
                            res: ri,
                            spin: si,
                        },
                        mol_name: mol.name.as_deref(),
                        res_num: res.num,
                        res_name: res.name.as_deref(),
                        spin,
                    };
                    selection
                        .contains_spin(
                            view.mol_name,
                            view.res_num,
                            view.res_name,
                            spin.num,
                            spin.name.as_deref(),
                        )
                        .then_some(view)
                })
            })
        })
    }

    /// Collect the spins matching a selection string (`None` for all spins).
    pub fn spins(&self, selection: Option<&str>) -> Result<Vec<SpinView<'_>>> {
        if !self.exists_data() {
            return Err(RelaxError::NoSequence);
        }
        let sel = Selection::from_opt(selection)?;
        Ok(self.spin_loop(&sel).collect())
    }

    /// Iterate over molecules matching a selection.
    ///
    /// Residue and spin tokens are meaningless here and are rejected.
    pub fn molecule_loop(&self, selection: Option<&str>) -> Result<Vec<(usize, &Molecule)>> {
        let sel = Selection::from_opt(selection)?;
        if sel.has_res_or_spin_tokens() {
            return Err(RelaxError::selection(
                selection.unwrap_or_default(),
                "residue and spin identifiers are not allowed in a molecule selection",
            ));
        }
        Ok(self
            .molecules
            .iter()
            .enumerate()
            .filter(|(_, m)| sel.contains_mol(m.name.as_deref()))
            .collect())
    }

    pub fn count_spins(&self, selection: Option<&str>, skip_desel: bool) -> Result<usize> {
        if !self.exists_data() {
            return Ok(0);
        }
        let sel = Selection::from_opt(selection)?;
        Ok(self
            .spin_loop(&sel)
            .filter(|v| !skip_desel || v.spin.select)
            .count())
    }

    /// Return the single spin matching an ID.
    ///
    /// `Ok(None)` when nothing matches, an error when the ID is ambiguous.
    pub fn return_spin(&self, spin_id: &str) -> Result<Option<SpinView<'_>>> {
        let sel = Selection::parse(spin_id)?;
        let mut found = self.spin_loop(&sel);
        let first = found.next();
        if found.next().is_some() {
            return Err(RelaxError::MultipleSpins(spin_id.to_string()));
        }
        Ok(first)
    }

    pub fn spin_index(&self, spin_id: &str) -> Result<SpinIndex> {
        self.return_spin(spin_id)?
            .map(|v| v.index)
            .ok_or_else(|| RelaxError::Unknown {
                kind: "spin",
                name: spin_id.to_string(),
            })
    }

    pub fn spin(&self, index: SpinIndex) -> Option<&Spin> {
        self.molecules
            .get(index.mol)?
            .residues
            .get(index.res)?
            .spins
            .get(index.spin)
    }

    pub fn spin_mut(&mut self, index: SpinIndex) -> Option<&mut Spin> {
        self.molecules
            .get_mut(index.mol)?
            .residues
            .get_mut(index.res)?
            .spins
            .get_mut(index.spin)
    }

    /// Canonical ID of the spin at `index`.
    pub fn spin_id(&self, index: SpinIndex) -> Option<String> {
        let mol = self.molecules.get(index.mol)?;
        let res = mol.residues.get(index.res)?;
        let spin = res.spins.get(index.spin)?;
        Some(generate_spin_id(
            mol.name.as_deref(),
            res.num,
            res.name.as_deref(),
            spin.num,
            spin.name.as_deref(),
        ))
    }

    fn indices(&self, selection: Option<&str>) -> Result<Vec<SpinIndex>> {
        Ok(self.spins(selection)?.into_iter().map(|v| v.index).collect())
    }

    fn for_each_spin(&mut self, indices: &[SpinIndex], mut f: impl FnMut(&mut Spin)) {
        for &idx in indices {
            if let Some(spin) = self.spin_mut(idx) {
                f(spin);
            }
        }
    }

    /// Select the spins matching `selection`.
    ///
    /// With `change_all`, every other spin is deselected.
    pub fn select(&mut self, selection: Option<&str>, change_all: bool) -> Result<usize> {
        self.set_selection(selection, change_all, true)
    }

    /// Deselect the spins matching `selection`.
    ///
    /// With `change_all`, every other spin is selected.
    pub fn deselect(&mut self, selection: Option<&str>, change_all: bool) -> Result<usize> {
        self.set_selection(selection, change_all, false)
    }

    fn set_selection(&mut self, selection: Option<&str>, change_all: bool, flag: bool) -> Result<usize> {
        let matching = self.indices(selection)?;
        if change_all {
            let all = self.indices(None)?;
            self.for_each_spin(&all, |s| s.select = !flag);
        }
        self.for_each_spin(&matching, |s| s.select = flag);
        debug!(count = matching.len(), select = flag, "changed spin selection");
        Ok(matching.len())
    }

    /// Flip the selection flag of the matching spins.
    pub fn reverse_selection(&mut self, selection: Option<&str>) -> Result<usize> {
        let matching = self.indices(selection)?;
        self.for_each_spin(&matching, |s| s.select = !s.select);
        Ok(matching.len())
    }

    pub fn name_spins(&mut self, name: &str, selection: Option<&str>) -> Result<usize> {
        let matching = self.indices(selection)?;
        self.for_each_spin(&matching, |s| s.name = Some(name.to_string()));
        Ok(matching.len())
    }

    pub fn set_isotope(&mut self, isotope: Isotope, selection: Option<&str>) -> Result<usize> {
        let matching = self.indices(selection)?;
        self.for_each_spin(&matching, |s| s.isotope = Some(isotope));
        Ok(matching.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two molecules with a mix of selected and deselected spins.
    fn system() -> SpinSystem {
        let mut sys = SpinSystem::new();
        sys.create_spin(Some("Ap4Aase"), Some(1), None, Some(60), Some("NH")).unwrap();
        sys.create_spin(Some("Ap4Aase"), Some(2), Some("Glu"), Some(63), Some("NH")).unwrap();
        sys.create_spin(Some("Ap4Aase"), Some(4), Some("Pro"), None, None).unwrap();
        sys.create_spin(Some("RNA"), Some(-5), None, None, Some("C8")).unwrap();
        sys.create_spin(Some("RNA"), Some(-5), None, None, Some("N5")).unwrap();
        sys.create_spin(Some("RNA"), Some(-4), None, None, Some("C8")).unwrap();
        sys.create_spin(Some("RNA"), Some(-4), None, None, Some("N5")).unwrap();

        sys.deselect(Some("#Ap4Aase:1"), false).unwrap();
        sys.deselect(Some("#Ap4Aase:4"), false).unwrap();
        sys.deselect(Some("#RNA:-5@C8"), false).unwrap();
        sys.deselect(Some("#RNA:-4@N5"), false).unwrap();
        sys
    }

    #[test]
    fn create_spin_builds_hierarchy() {
        let sys = system();
        assert_eq!(sys.molecules.len(), 2);
        assert_eq!(sys.molecules[0].residues.len(), 3);
        assert_eq!(sys.molecules[1].residues[0].spins.len(), 2);
        assert!(sys.exists_data());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut sys = system();
        let err = sys.create_spin(Some("RNA"), Some(-5), None, None, Some("N5")).unwrap_err();
        assert!(matches!(err, RelaxError::Duplicate { kind: "spin", .. }));
        assert!(sys.create_molecule(Some("RNA")).is_err());
        assert!(sys.create_residue(0, Some(2), None).is_err());
    }

    #[test]
    fn spin_loop_follows_selection() {
        let sys = system();
        let ids: Vec<String> = sys.spins(Some("@N5")).unwrap().iter().map(|v| v.id()).collect();
        assert_eq!(ids, vec!["#RNA:-5@N5", "#RNA:-4@N5"]);

        let all = sys.spins(None).unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[1].res_name, Some("Glu"));
    }

    #[test]
    fn counts_skip_deselected() {
        let sys = system();
        assert_eq!(sys.count_spins(None, false).unwrap(), 7);
        assert_eq!(sys.count_spins(None, true).unwrap(), 3);
        assert_eq!(sys.count_spins(Some("#RNA"), true).unwrap(), 2);
        assert_eq!(SpinSystem::new().count_spins(None, true).unwrap(), 0);
    }

    #[test]
    fn return_spin_single_and_ambiguous() {
        let sys = system();
        let view = sys.return_spin("#Ap4Aase:2").unwrap().unwrap();
        assert_eq!(view.spin.num, Some(63));
        assert!(sys.return_spin(":100").unwrap().is_none());
        assert!(matches!(sys.return_spin("@C8"), Err(RelaxError::MultipleSpins(_))));
    }

    #[test]
    fn hyphenated_molecule_names() {
        let mut sys = SpinSystem::new();
        sys.create_spin(Some("N-dom"), Some(1), None, None, Some("N")).unwrap();
        sys.create_spin(Some("C-dom"), Some(1), None, None, Some("N")).unwrap();

        let view = sys.return_spin("#N-dom:1@N").unwrap().unwrap();
        assert_eq!(view.id(), "#N-dom:1@N");
        assert_eq!(sys.deselect(Some("#C-dom"), false).unwrap(), 1);
        assert_eq!(sys.count_spins(None, true).unwrap(), 1);
    }

    #[test]
    fn change_all_inverts_the_rest() {
        let mut sys = system();
        sys.select(Some("#RNA"), true).unwrap();
        assert_eq!(sys.count_spins(Some("#RNA"), true).unwrap(), 4);
        assert_eq!(sys.count_spins(Some("#Ap4Aase"), true).unwrap(), 0);

        sys.reverse_selection(None).unwrap();
        assert_eq!(sys.count_spins(None, true).unwrap(), 3);
    }

    #[test]
    fn naming_and_isotopes() {
        let mut sys = system();
        assert_eq!(sys.name_spins("N", Some("#Ap4Aase:4")).unwrap(), 1);
        let idx = sys.spin_index("#Ap4Aase:4@N").unwrap();
        assert_eq!(sys.spin_id(idx).unwrap(), "#Ap4Aase:4@N");

        sys.set_isotope(Isotope::N15, Some("#Ap4Aase")).unwrap();
        assert_eq!(sys.spin(idx).unwrap().isotope, Some(Isotope::N15));
    }

    #[test]
    fn molecule_loop_rejects_spin_tokens() {
        let sys = system();
        assert_eq!(sys.molecule_loop(Some("#RNA")).unwrap().len(), 1);
        assert!(sys.molecule_loop(Some("#RNA@N5")).is_err());
    }

    #[test]
    fn empty_system_has_no_sequence() {
        let sys = SpinSystem::new();
        assert!(matches!(sys.spins(None), Err(RelaxError::NoSequence)));
    }
}
