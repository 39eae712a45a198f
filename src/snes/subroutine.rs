use std::collections::{BTreeMap, HashSet};

use getset::{CopyGetters, Getters};

use crate::snes::instruction::Instruction;
use crate::snes::state::StateChange;

/// A subroutine: every instruction reachable from one entry PC, plus the
/// set of state changes observed on its return paths (spec component F).
#[derive(Getters, CopyGetters)]
pub struct Subroutine {
    #[getset(get_copy = "pub")]
    pc: usize,

    #[getset(get = "pub")]
    label: String,

    instructions: BTreeMap<usize, Instruction>,

    /// Distinct known state changes observed across all return paths.
    /// `propagate_subroutine_state` treats exactly one entry as "the"
    /// return state; zero or several is ambiguous.
    known_state_changes: HashSet<StateChange>,

    /// Distinct unknown state changes (each carrying its own reason).
    /// Any entry here makes the subroutine's own return state unknown.
    unknown_state_changes: HashSet<StateChange>,
}

impl Subroutine {
    pub fn new(pc: usize, label: String) -> Self {
        Self {
            pc,
            label,
            instructions: BTreeMap::new(),
            known_state_changes: HashSet::new(),
            unknown_state_changes: HashSet::new(),
        }
    }

    /// Instructions belonging to this subroutine, in address order.
    pub fn instructions(&self) -> &BTreeMap<usize, Instruction> {
        &self.instructions
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.instructions.insert(instruction.pc(), instruction);
    }

    /// Rename the subroutine, e.g. to an entry point's fixed label
    /// ("reset", "nmi") once it's known this PC is an entry point.
    pub fn set_label(&mut self, label: String) {
        self.label = label;
    }

    /// Record a state change observed at `pc` (the instruction where the
    /// analysis stopped walking this path: a return or a dead end).
    pub fn add_state_change(&mut self, pc: usize, state_change: StateChange) {
        if state_change.unknown() {
            log::debug!(
                "subroutine {:#08x}: unknown state change at {:#08x}: {}",
                self.pc,
                pc,
                state_change
            );
            self.unknown_state_changes.insert(state_change);
        } else {
            self.known_state_changes.insert(state_change);
        }
    }

    pub fn known_state_changes(&self) -> &HashSet<StateChange> {
        &self.known_state_changes
    }

    pub fn unknown_state_changes(&self) -> &HashSet<StateChange> {
        &self.unknown_state_changes
    }

    /// True if any return path from this subroutine ended in an unknown
    /// state change.
    pub fn is_unknown(&self) -> bool {
        !self.unknown_state_changes.is_empty()
    }

    /// True once at least one return path has been fully analyzed.
    pub fn is_resolved(&self) -> bool {
        !self.known_state_changes.is_empty() || !self.unknown_state_changes.is_empty()
    }

    /// True if at least one walk through this subroutine reached a standard
    /// RTS/RTL/RTI (recorded as a known state change), as opposed to every
    /// walk dead-ending in an unknown reason.
    pub fn is_terminating(&self) -> bool {
        !self.known_state_changes.is_empty()
    }
}
