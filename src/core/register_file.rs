//! Physical registers and register sets.
//!
//! A target describes its registers with a [`RegisterFile`]: printable names,
//! the allocatable subset and the accumulator. Sets of registers are tracked
//! with the [`RegSet`] bitset, which the allocator uses for forbidden colors
//! and the descriptor table uses for clobber lists.

use std::fmt;

/// Maximum number of physical registers a target may describe.
pub const MAX_REGISTERS: usize = 32;

/// Physical register index within the target's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u8);

impl PhysReg {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegSet(u32);

impl RegSet {
    /// Create empty register set.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Registers `0..count`.
    pub const fn first(count: usize) -> Self {
        if count >= MAX_REGISTERS {
            Self(u32::MAX)
        } else {
            Self((1u32 << count) - 1)
        }
    }

    pub fn of(regs: &[PhysReg]) -> Self {
        let mut set = Self::new();
        for &r in regs {
            set.insert(r);
        }
        set
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, reg: PhysReg) -> bool {
        reg.index() < MAX_REGISTERS && self.0 & (1 << reg.0) != 0
    }

    pub fn insert(&mut self, reg: PhysReg) {
        if reg.index() < MAX_REGISTERS {
            self.0 |= 1 << reg.0;
        }
    }

    pub fn remove(&mut self, reg: PhysReg) {
        if reg.index() < MAX_REGISTERS {
            self.0 &= !(1 << reg.0);
        }
    }

    pub fn union(self, other: RegSet) -> RegSet {
        RegSet(self.0 | other.0)
    }

    pub fn intersect(self, other: RegSet) -> RegSet {
        RegSet(self.0 & other.0)
    }

    pub fn difference(self, other: RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest-numbered register in the set.
    pub fn first_reg(self) -> Option<PhysReg> {
        if self.0 == 0 {
            None
        } else {
            Some(PhysReg(self.0.trailing_zeros() as u8))
        }
    }

    /// Registers in ascending order.
    pub fn iter(self) -> impl Iterator<Item = PhysReg> {
        let bits = self.0;
        (0..MAX_REGISTERS as u8).filter(move |i| bits & (1 << i) != 0).map(PhysReg)
    }
}

impl FromIterator<PhysReg> for RegSet {
    fn from_iter<I: IntoIterator<Item = PhysReg>>(iter: I) -> Self {
        let mut set = RegSet::new();
        for r in iter {
            set.insert(r);
        }
        set
    }
}

/// Register description of a target machine.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    names: Vec<&'static str>,
    allocatable: RegSet,
    accumulator: PhysReg,
}

impl RegisterFile {
    /// Register file where every named register is allocatable.
    pub fn new(names: &[&'static str], accumulator: PhysReg) -> Self {
        Self {
            names: names.to_vec(),
            allocatable: RegSet::first(names.len()),
            accumulator,
        }
    }

    pub fn with_allocatable(mut self, allocatable: RegSet) -> Self {
        self.allocatable = allocatable.intersect(RegSet::first(self.names.len()));
        self
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn all(&self) -> RegSet {
        RegSet::first(self.names.len())
    }

    pub fn allocatable(&self) -> RegSet {
        self.allocatable
    }

    /// Number of colors available to the allocator.
    pub fn num_colors(&self) -> usize {
        self.allocatable.len()
    }

    pub fn accumulator(&self) -> PhysReg {
        self.accumulator
    }

    pub fn name(&self, reg: PhysReg) -> &'static str {
        self.names.get(reg.index()).copied().unwrap_or("?")
    }

    pub fn lookup(&self, name: &str) -> Option<PhysReg> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|i| PhysReg(i as u8))
    }

    pub fn regs(&self) -> impl Iterator<Item = PhysReg> + '_ {
        (0..self.names.len() as u8).map(PhysReg)
    }
}

/// Display helper pairing a register with its file.
pub struct RegName<'a>(pub &'a RegisterFile, pub PhysReg);

impl fmt::Display for RegName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name(self.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regset_operations() {
        let mut set = RegSet::new();
        assert!(set.is_empty());
        set.insert(PhysReg(3));
        set.insert(PhysReg(1));
        assert!(set.contains(PhysReg(1)));
        assert!(!set.contains(PhysReg(2)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.first_reg(), Some(PhysReg(1)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![PhysReg(1), PhysReg(3)]);

        let all = RegSet::first(4);
        assert_eq!(all.difference(set).iter().collect::<Vec<_>>(), vec![PhysReg(0), PhysReg(2)]);
        assert_eq!(all.intersect(set), set);
        set.remove(PhysReg(1));
        assert_eq!(set.first_reg(), Some(PhysReg(3)));
    }

    #[test]
    fn test_register_file_lookup() {
        let file = RegisterFile::new(&["A", "B", "C"], PhysReg(0))
            .with_allocatable(RegSet::of(&[PhysReg(1), PhysReg(2)]));
        assert_eq!(file.len(), 3);
        assert_eq!(file.num_colors(), 2);
        assert_eq!(file.lookup("b"), Some(PhysReg(1)));
        assert_eq!(file.name(PhysReg(2)), "C");
        assert_eq!(RegName(&file, PhysReg(0)).to_string(), "A");
        assert!(!file.allocatable().contains(file.accumulator()));
    }
}
