use std::collections::HashMap;

use derive_new::new;

use crate::snes::instruction::Instruction;
use crate::snes::state::{State, StateChange};

/// Payload of a stack entry.
#[derive(Copy, Clone)]
pub enum Data {
    None,
    Byte(u8),
    State(State, StateChange),
}

/// One byte-sized slot of the shadow stack.
#[derive(new, Copy, Clone)]
pub struct Entry {
    pub instruction: Option<Instruction>,
    pub data: Data,
}

/// Abstract model of the 65816 hardware stack (spec component G).
///
/// Tracks which instruction pushed each byte so that returns and PLP can be
/// checked against their matching push, without modeling actual values.
#[derive(Clone)]
pub struct Stack {
    memory: HashMap<isize, Entry>,
    pointer: isize,
}

impl Stack {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            memory: HashMap::new(),
            pointer: 0,
        }
    }

    /// Current stack pointer, relative to wherever this walk's stack
    /// started (not a hardware SNES stack pointer).
    pub fn pointer(&self) -> isize {
        self.pointer
    }

    /// Push `size` bytes, all tagged with `instruction`.
    pub fn push(&mut self, instruction: Instruction, data: Data, size: usize) {
        for i in (0..size).rev() {
            let byte_data = match data {
                Data::Byte(b) => Data::Byte(b >> (i * 8)),
                _ => data,
            };
            self.memory.insert(self.pointer, Entry::new(Some(instruction), byte_data));
            self.pointer -= 1;
        }
    }

    /// Push a single untagged byte (the common case: we don't know the value
    /// being pushed, only that `size` bytes were pushed by `instruction`).
    pub fn push_one(&mut self, instruction: Instruction, data: Data) {
        self.push(instruction, data, 1);
    }

    /// Push a PHP snapshot: the full state and the state change accumulated
    /// so far, so a matching PLP can restore both exactly.
    pub fn push_state(&mut self, instruction: Instruction, state: State, state_change: StateChange) {
        self.memory
            .insert(self.pointer, Entry::new(Some(instruction), Data::State(state, state_change)));
        self.pointer -= 1;
    }

    /// Pop `size` bytes, in push order (most-recently-pushed first).
    pub fn pop(&mut self, size: usize) -> Vec<Entry> {
        (0..size).map(|_| self.pop_one()).collect()
    }

    /// Pop a single entry.
    pub fn pop_one(&mut self) -> Entry {
        self.pointer += 1;
        match self.memory.remove(&self.pointer) {
            Some(entry) => entry,
            // Popping past anything we've tracked: the value came from
            // outside this analysis (e.g. an entry-point stub). Treat it as
            // an untagged slot rather than panicking.
            None => Entry::new(None, Data::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr() -> Instruction {
        Instruction::new(0x8000, 0x8000, State::new(0), 0x20, 0x1234)
    }

    #[test]
    fn test_pointer_tracks_net_push_depth() {
        let mut stack = Stack::new();
        assert_eq!(stack.pointer(), 0);
        stack.push(instr(), Data::None, 2);
        assert_eq!(stack.pointer(), -2);
        stack.pop(2);
        assert_eq!(stack.pointer(), 0);
    }

    #[test]
    fn test_push_pop_roundtrip() {
        let mut stack = Stack::new();
        let caller = instr();
        stack.push(caller, Data::None, 2);

        let entries = stack.pop(2);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].instruction.is_some());
        assert_eq!(entries[0].instruction.unwrap().pc(), 0x8000);
    }

    #[test]
    fn test_pop_past_tracked_region() {
        let mut stack = Stack::new();
        let entry = stack.pop_one();
        assert!(entry.instruction.is_none());
    }

    #[test]
    fn test_push_state_roundtrip() {
        let mut stack = Stack::new();
        let caller = instr();
        let state = State::from_mxe(true, false, false);
        let change = StateChange::new_empty();
        stack.push_state(caller, state, change);

        let entry = stack.pop_one();
        match entry.data {
            Data::State(s, _) => assert_eq!(s, state),
            _ => panic!("expected a State payload"),
        }
    }
}
