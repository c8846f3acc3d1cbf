//! WebAssembly table implementation
//!
//! A table is a vector of function addresses used by `call_indirect`. Slots
//! start empty; calling through an empty slot traps.

use super::store::Addr;
use super::{RuntimeError, TrapKind};
use crate::ast::Limit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    elements: Vec<Option<Addr>>,
    limits: Limit,
}

impl Table {
    /// Create a table of `limits.min` empty slots.
    pub fn new(limits: Limit) -> Self {
        Table {
            elements: vec![None; limits.min as usize],
            limits,
        }
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn limits(&self) -> &Limit {
        &self.limits
    }

    /// The function address at `index`.
    ///
    /// # Errors
    /// Traps with `UndefinedElement` when the index is out of bounds or the
    /// slot was never initialized.
    pub fn get(&self, index: u32) -> Result<Addr, RuntimeError> {
        match self.elements.get(index as usize) {
            Some(Some(addr)) => Ok(*addr),
            _ => Err(RuntimeError::Trap(TrapKind::UndefinedElement)),
        }
    }

    pub fn set(&mut self, index: u32, addr: Addr) -> Result<(), RuntimeError> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(RuntimeError::Trap(TrapKind::UndefinedElement))?;
        *slot = Some(addr);
        Ok(())
    }

    /// Writes `addrs` from `offset` on, checking the whole range first.
    pub fn init(&mut self, offset: u32, addrs: &[Addr]) -> Result<(), RuntimeError> {
        let start = offset as usize;
        let end = start
            .checked_add(addrs.len())
            .filter(|end| *end <= self.elements.len())
            .ok_or_else(|| RuntimeError::MemoryError("elements segment does not fit".to_string()))?;
        for (slot, addr) in self.elements[start..end].iter_mut().zip(addrs) {
            *slot = Some(*addr);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_creation() {
        let table = Table::new(Limit { min: 10, max: Some(20) });
        assert_eq!(table.size(), 10);
        assert_eq!(table.limits().max, Some(20));
    }

    #[test]
    fn test_table_get_set() {
        let mut table = Table::new(Limit { min: 2, max: None });
        assert_eq!(table.get(0), Err(RuntimeError::Trap(TrapKind::UndefinedElement)));

        table.set(0, Addr(42)).unwrap();
        assert_eq!(table.get(0).unwrap(), Addr(42));
        assert!(table.set(2, Addr(1)).is_err());
        assert!(table.get(2).unwrap_err().is_trap());
    }

    #[test]
    fn test_table_init() {
        let mut table = Table::new(Limit { min: 4, max: None });
        table.init(1, &[Addr(7), Addr(8)]).unwrap();
        assert_eq!(table.get(1).unwrap(), Addr(7));
        assert_eq!(table.get(2).unwrap(), Addr(8));

        assert!(table.init(3, &[Addr(1), Addr(2)]).is_err());
        assert!(table.get(3).is_err());
    }
}
