//! Value manifests: at every point in a chunk, which register holds each
//! semantic value, and under what restriction.
//!
//! A *semantic value* is a pure identity ("the contents of frame slot N as
//! of write T") independent of which register currently carries it. The
//! manifest is maintained bidirectionally (semantic value → register and
//! register → semantic values) so renames and dead-register elimination are
//! cheap. At a control-flow merge the manifest is the intersection of the
//! predecessors'; a semantic value whose predecessors disagree on the
//! carrying register is reconciled through a phi whose output restriction
//! is the union of the inputs'.

use ahash::AHashMap;

use crate::operand::{Register, TypeRestriction};

/// The identity of a datum, independent of its current register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticValue {
    /// Contents of a one-based frame slot as of its `version`-th write.
    FrameSlot { slot: usize, version: u32 },
    /// A translator-invented temporary (operand-stack entries, unboxed
    /// shadows).
    Temp { id: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    bindings: AHashMap<SemanticValue, (Register, TypeRestriction)>,
    carriers: AHashMap<Register, Vec<SemanticValue>>,
}

/// A phi required to reconcile a merge: the semantic value, the register
/// each predecessor carries it in, and the reconciled output register.
#[derive(Debug, Clone)]
pub struct PhiRequirement {
    pub semantic_value: SemanticValue,
    pub sources: Vec<Register>,
    pub output: Register,
    pub restriction: TypeRestriction,
}

impl Manifest {
    pub fn new() -> Manifest {
        Manifest::default()
    }

    pub fn bind(
        &mut self,
        semantic_value: SemanticValue,
        register: Register,
        restriction: TypeRestriction,
    ) {
        if let Some((old_register, _)) = self.bindings.get(&semantic_value) {
            let old_register = *old_register;
            self.remove_carrier(old_register, semantic_value);
        }
        self.bindings
            .insert(semantic_value, (register, restriction));
        self.carriers
            .entry(register)
            .or_default()
            .push(semantic_value);
    }

    fn remove_carrier(&mut self, register: Register, semantic_value: SemanticValue) {
        if let Some(values) = self.carriers.get_mut(&register) {
            values.retain(|value| *value != semantic_value);
            if values.is_empty() {
                self.carriers.remove(&register);
            }
        }
    }

    pub fn register_for(&self, semantic_value: SemanticValue) -> Option<Register> {
        self.bindings.get(&semantic_value).map(|(register, _)| *register)
    }

    pub fn restriction_for(&self, semantic_value: SemanticValue) -> Option<&TypeRestriction> {
        self.bindings
            .get(&semantic_value)
            .map(|(_, restriction)| restriction)
    }

    /// All semantic values a register currently carries.
    pub fn values_in(&self, register: Register) -> &[SemanticValue] {
        self.carriers
            .get(&register)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    /// Drop a register and everything it carried (dead-register
    /// elimination).
    pub fn forget_register(&mut self, register: Register) {
        if let Some(values) = self.carriers.remove(&register) {
            for value in values {
                self.bindings.remove(&value);
            }
        }
    }

    /// Rename without touching restrictions: `to` now carries everything
    /// `from` did.
    pub fn rename_register(&mut self, from: Register, to: Register) {
        if let Some(values) = self.carriers.remove(&from) {
            for value in &values {
                if let Some((register, _)) = self.bindings.get_mut(value) {
                    *register = to;
                }
            }
            self.carriers.entry(to).or_default().extend(values);
        }
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&SemanticValue, &(Register, TypeRestriction))> {
        self.bindings.iter()
    }

    pub fn live_registers(&self) -> Vec<Register> {
        let mut registers: Vec<Register> = self.carriers.keys().copied().collect();
        registers.sort_by_key(|register| (register.kind as u8, register.index));
        registers
    }

    /// Intersect with `other`: keep only semantic values both sides know.
    /// Disagreements on the carrying register become phi requirements,
    /// allocating outputs through `fresh_output`.
    pub fn merge(
        &self,
        other: &Manifest,
        fresh_output: &mut dyn FnMut(Register) -> Register,
    ) -> (Manifest, Vec<PhiRequirement>) {
        let mut merged = Manifest::new();
        let mut phis = Vec::new();
        for (semantic_value, (register, restriction)) in &self.bindings {
            let Some((other_register, other_restriction)) = other.bindings.get(semantic_value)
            else {
                continue;
            };
            let widened = restriction.union(other_restriction);
            if register == other_register {
                merged.bind(*semantic_value, *register, widened);
            } else {
                let output = fresh_output(*register);
                phis.push(PhiRequirement {
                    semantic_value: *semantic_value,
                    sources: vec![*register, *other_register],
                    output,
                    restriction: widened.clone(),
                });
                merged.bind(*semantic_value, output, widened);
            }
        }
        (merged, phis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::RegisterKind;
    use core_value::{scalar, types};

    fn slot(n: usize) -> SemanticValue {
        SemanticValue::FrameSlot {
            slot: n,
            version: 0,
        }
    }

    #[test]
    fn bind_and_rename_stay_bidirectional() {
        let mut manifest = Manifest::new();
        manifest.bind(
            slot(1),
            Register::boxed(0),
            TypeRestriction::of_type(types::integers()),
        );
        manifest.bind(
            slot(2),
            Register::boxed(0),
            TypeRestriction::of_type(types::integers()),
        );
        assert_eq!(manifest.values_in(Register::boxed(0)).len(), 2);
        manifest.rename_register(Register::boxed(0), Register::boxed(5));
        assert_eq!(manifest.register_for(slot(1)), Some(Register::boxed(5)));
        assert!(manifest.values_in(Register::boxed(0)).is_empty());
    }

    #[test]
    fn merge_agreement_needs_no_phi() {
        let mut a = Manifest::new();
        let mut b = Manifest::new();
        a.bind(
            slot(1),
            Register::boxed(0),
            TypeRestriction::of_constant(scalar::integer(1)),
        );
        b.bind(
            slot(1),
            Register::boxed(0),
            TypeRestriction::of_constant(scalar::integer(2)),
        );
        let mut next = 10usize;
        let (merged, phis) = a.merge(&b, &mut |_| {
            next += 1;
            Register::boxed(next)
        });
        assert!(phis.is_empty());
        assert_eq!(merged.register_for(slot(1)), Some(Register::boxed(0)));
        // Disagreeing constants widen away.
        assert!(merged.restriction_for(slot(1)).unwrap().constant.is_none());
    }

    #[test]
    fn merge_disagreement_inserts_a_phi() {
        let mut a = Manifest::new();
        let mut b = Manifest::new();
        a.bind(
            slot(1),
            Register::boxed(0),
            TypeRestriction::of_type(types::integers()),
        );
        b.bind(
            slot(1),
            Register::boxed(3),
            TypeRestriction::of_type(types::string_type()),
        );
        let (merged, phis) = a.merge(&b, &mut |_| Register::boxed(9));
        assert_eq!(phis.len(), 1);
        let phi = &phis[0];
        assert_eq!(phi.sources, vec![Register::boxed(0), Register::boxed(3)]);
        assert_eq!(phi.output, Register::boxed(9));
        assert_eq!(phi.output.kind, RegisterKind::Boxed);
        assert_eq!(merged.register_for(slot(1)), Some(Register::boxed(9)));
        // The phi output's restriction covers both inputs.
        let restriction = merged.restriction_for(slot(1)).unwrap();
        assert!(scalar::integer(4).is_instance_of(&restriction.ty));
        assert!(core_value::tuple::string_value("x").is_instance_of(&restriction.ty));
    }

    #[test]
    fn values_dropped_on_one_side_do_not_survive_a_merge() {
        let mut a = Manifest::new();
        let b = Manifest::new();
        a.bind(
            slot(1),
            Register::boxed(0),
            TypeRestriction::of_type(types::integers()),
        );
        let (merged, phis) = a.merge(&b, &mut |register| register);
        assert!(phis.is_empty());
        assert!(merged.register_for(slot(1)).is_none());
    }
}
