use std::collections::{BTreeMap, HashMap, HashSet};

use getset::{CopyGetters, Getters};

use crate::rom::Rom;
use crate::snes::cpu::Cpu;
use crate::snes::instruction::Instruction;
use crate::snes::state::{State, StateChange};
use crate::snes::subroutine::Subroutine;

/// A seed PC at which a walk starts, e.g. the reset or NMI vector.
/// Equality and the map key are by `pc` alone: re-adding an entry point at
/// an already-seeded PC replaces it.
#[derive(Copy, Clone, CopyGetters)]
pub struct EntryPoint {
    #[getset(get_copy = "pub")]
    pc: usize,
    #[getset(get_copy = "pub")]
    state: State,
    #[getset(get_copy = "pub")]
    label: &'static str,
}

/// A directed edge from an instruction to a target PC, scoped by the
/// subroutine doing the referencing. Hashes/equals by `(target,
/// subroutine_pc)`; the source PC is the key of the map this lives under.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Reference {
    pub target: usize,
    pub subroutine_pc: usize,
}

/// Status of a declared jump table: whether every index in its range has
/// been accounted for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JumpTableStatus {
    Partial,
    Complete,
}

/// A user-declared indirect-jump table: a caller PC, an inclusive index
/// range, and the index→target map materialized at declaration time.
#[derive(Getters, CopyGetters)]
pub struct JumpTable {
    #[getset(get_copy = "pub")]
    caller_pc: usize,
    #[getset(get_copy = "pub")]
    status: JumpTableStatus,
    #[getset(get = "pub")]
    targets: BTreeMap<usize, usize>,
}

/// Top-level container: owns the ROM view, entry points, the decoded
/// instruction/subroutine/reference graph, and the assertion and
/// jump-table overlays; drives the CPU interpreter from each entry point.
pub struct Analysis {
    rom: Rom,

    entry_points: Vec<EntryPoint>,

    /// All decodings seen at a given PC, across subroutines and states.
    /// Usually one entry; more than one means the same bytes decode
    /// differently depending on context (`m`/`x`).
    instructions: HashMap<usize, Vec<Instruction>>,

    subroutines: BTreeMap<usize, Subroutine>,

    references: HashMap<usize, HashSet<Reference>>,

    instruction_assertions: HashMap<usize, StateChange>,
    subroutine_assertions: HashMap<(usize, usize), StateChange>,

    jump_tables: HashMap<usize, JumpTable>,

    /// `loc_XXXXXX` labels assigned to in-subroutine jump targets during
    /// `generate_local_labels`. Subroutine-entry labels live on the
    /// `Subroutine` itself; this covers everything else.
    labels: HashMap<usize, String>,
}

impl Analysis {
    pub fn new(rom: Rom) -> Self {
        Self {
            rom,
            entry_points: Vec::new(),
            instructions: HashMap::new(),
            subroutines: BTreeMap::new(),
            references: HashMap::new(),
            instruction_assertions: HashMap::new(),
            subroutine_assertions: HashMap::new(),
            jump_tables: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    /// Add or replace the entry point seeded at `pc`. `label` is a
    /// `'static` string since it names a fixed seed ("reset", "nmi"), not
    /// data computed from the ROM.
    pub fn add_entry_point(&mut self, label: &'static str, pc: usize, state: State) {
        log::debug!("seeding entry point \"{}\" at {:#08x}", label, pc);
        match self.entry_points.iter_mut().find(|e| e.pc == pc) {
            Some(entry) => {
                entry.state = state;
                entry.label = label;
            }
            None => self.entry_points.push(EntryPoint { pc, state, label }),
        }
    }

    pub fn remove_entry_point(&mut self, pc: usize) {
        self.entry_points.retain(|e| e.pc != pc);
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn add_assertion_instruction(&mut self, pc: usize, change: StateChange) {
        self.instruction_assertions.insert(pc, change);
    }

    pub fn add_assertion_subroutine(&mut self, pc: usize, subroutine_pc: usize, change: StateChange) {
        self.subroutine_assertions.insert((pc, subroutine_pc), change);
    }

    /// The state-change override in effect at `(pc, subroutine_pc)`, if
    /// any: a subroutine-scoped assertion takes precedence over a global
    /// instruction-scoped one.
    pub fn assertion_at(&self, pc: usize, subroutine_pc: usize) -> Option<StateChange> {
        self.subroutine_assertions
            .get(&(pc, subroutine_pc))
            .or_else(|| self.instruction_assertions.get(&pc))
            .copied()
    }

    /// Declare a jump table and immediately materialize its `index ->
    /// target` entries by reading the ROM. `stride` is 2 for a table of
    /// 16-bit addresses (combined with the caller's bank) or 3 for a table
    /// of full 24-bit addresses.
    pub fn declare_jump_table(&mut self, caller_pc: usize, lo: usize, hi: usize, stride: usize, status: JumpTableStatus) {
        let bank = caller_pc & 0xFF0000;
        let base = self.rom.read_word(caller_pc + 1) as usize;

        let mut targets = BTreeMap::new();
        let mut index = lo;
        while index <= hi {
            let addr = bank | ((base + index) & 0xFFFF);
            let target = if stride == 3 {
                self.rom.read_address(addr)
            } else {
                bank | (self.rom.read_word(addr) as usize)
            };
            targets.insert(index, target);
            index += stride;
        }

        self.jump_tables.insert(
            caller_pc,
            JumpTable {
                caller_pc,
                status,
                targets,
            },
        );
    }

    pub fn jump_table_at(&self, caller_pc: usize) -> Option<&JumpTable> {
        self.jump_tables.get(&caller_pc)
    }

    /// Purge derived state (instructions, subroutines, references, labels)
    /// but keep entry points, assertions, and jump tables — those are
    /// inputs to the next `run()`, not outputs of the last one.
    pub fn clear(&mut self) {
        self.instructions.clear();
        self.subroutines.clear();
        self.references.clear();
        self.labels.clear();
    }

    /// Run the analysis from scratch: clear derived state, walk every
    /// entry point in insertion order (reset before NMI, by convention of
    /// the caller's seeding order), then assign local labels.
    pub fn run(&mut self) {
        self.clear();

        for entry in self.entry_points.clone() {
            self.add_subroutine(entry.pc);
            self.subroutine_mut(entry.pc).set_label(entry.label.to_string());

            let mut cpu = Cpu::new(entry.pc, entry.pc, entry.state);
            cpu.run(self);
        }

        self.generate_local_labels();
    }

    /// Record a decoded instruction, deduplicated by `(pc, subroutine_pc,
    /// state)`. Returns `None` if this exact tuple was already recorded.
    pub fn add_instruction(
        &mut self,
        pc: usize,
        subroutine_pc: usize,
        opcode: u8,
        argument: usize,
        state: State,
    ) -> Option<Instruction> {
        let existing = self.instructions.entry(pc).or_default();
        if existing
            .iter()
            .any(|i| i.subroutine_pc() == subroutine_pc && i.state().p() == state.p())
        {
            return None;
        }

        let instruction = Instruction::new(pc, subroutine_pc, state, opcode, argument);
        existing.push(instruction);

        self.subroutine_mut(subroutine_pc).add_instruction(instruction);
        Some(instruction)
    }

    /// Ensure a subroutine exists at `pc`, creating it with a default
    /// `sub_XXXXXX` label if this is the first time it's been targeted.
    pub fn add_subroutine(&mut self, pc: usize) {
        if !self.subroutines.contains_key(&pc) {
            let label = format!("sub_{:06X}", pc);
            log::debug!("new subroutine {} at {:#08x}", label, pc);
            self.subroutines.insert(pc, Subroutine::new(pc, label));
        }
    }

    pub fn add_reference(&mut self, source: usize, target: usize, subroutine_pc: usize) {
        self.references
            .entry(source)
            .or_default()
            .insert(Reference { target, subroutine_pc });
    }

    pub fn subroutines(&self) -> &BTreeMap<usize, Subroutine> {
        &self.subroutines
    }

    pub fn subroutine_mut(&mut self, pc: usize) -> &mut Subroutine {
        self.subroutines
            .get_mut(&pc)
            .expect("subroutine must exist before being addressed")
    }

    /// Every decoding recorded at `pc`, regardless of which subroutine or
    /// state it was decoded under.
    pub fn instructions_at(&self, pc: usize) -> &[Instruction] {
        self.instructions.get(&pc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// An arbitrary representative instruction decoded at `pc`, or `None`
    /// if `pc` was never visited.
    pub fn any_instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(&pc).and_then(|v| v.first())
    }

    pub fn references_from(&self, pc: usize) -> Option<&HashSet<Reference>> {
        self.references.get(&pc)
    }

    pub fn local_label(&self, pc: usize) -> Option<&str> {
        self.labels.get(&pc).map(String::as_str)
    }

    /// For every reference whose target isn't itself a subroutine entry,
    /// assign a `loc_XXXXXX` label to the instruction at that target,
    /// inside the subroutine that made the reference.
    fn generate_local_labels(&mut self) {
        let mut to_label = Vec::new();
        for references in self.references.values() {
            for reference in references {
                if self.subroutines.contains_key(&reference.target) {
                    continue;
                }
                if let Some(sub) = self.subroutines.get(&reference.subroutine_pc) {
                    if sub.instructions().contains_key(&reference.target) {
                        to_label.push(reference.target);
                    }
                }
            }
        }
        for pc in to_label {
            self.labels.entry(pc).or_insert_with(|| format!("loc_{:06X}", pc));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_bytes(bytes: &[u8]) -> Rom {
        let mut data = vec![0u8; 0x8000];
        data[..bytes.len()].copy_from_slice(bytes);
        Rom::new(data)
    }

    #[test]
    fn test_dedup_by_state() {
        // REP #$20; LDA #$1234; JMP $8000
        let rom = rom_with_bytes(&[0xC2, 0x20, 0xA9, 0x34, 0x12, 0x4C, 0x00, 0x80]);
        let mut analysis = Analysis::new(rom);
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        assert_eq!(analysis.instructions_at(0x8000).len(), 1);
        let total = analysis.subroutines().get(&0x8000).unwrap().instructions().len();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_call_propagates_state_change() {
        // caller: JSR $8010; BRA $8003 (self)
        // callee: SEP #$20; RTS
        let mut data = vec![0u8; 0x8000];
        data[0..5].copy_from_slice(&[0x20, 0x10, 0x80, 0x80, 0xFE]);
        data[0x10..0x12].copy_from_slice(&[0xE2, 0x20]);
        data[0x12] = 0x60;
        let rom = Rom::new(data);

        let mut analysis = Analysis::new(rom);
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        assert_eq!(analysis.subroutines().len(), 2);
        let callee = analysis.subroutines().get(&0x8010).unwrap();
        assert_eq!(callee.known_state_changes().len(), 1);
        let change = *callee.known_state_changes().iter().next().unwrap();
        assert_eq!(change.m(), Some(true));
    }

    #[test]
    fn test_local_label_assigned_to_branch_target() {
        // loc: NOP; BCS loc (backward branch within the same subroutine)
        let rom = rom_with_bytes(&[0xEA, 0xB0, 0xFC]);
        let mut analysis = Analysis::new(rom);
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        assert_eq!(analysis.local_label(0x8000), Some("loc_008000"));
    }

    #[test]
    fn test_stack_manipulation_detected() {
        // PHP; PLA; RTS
        let rom = rom_with_bytes(&[0x08, 0x68, 0x60]);
        let mut analysis = Analysis::new(rom);
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        let sub = analysis.subroutines().get(&0x8000).unwrap();
        assert!(sub.is_unknown());
    }

    #[test]
    fn test_jump_table_resolves_indirect_jump() {
        use crate::snes::state::UnknownReason;

        // JMP ($8100,X) at $8000; BRK at each of the two declared targets.
        let mut data = vec![0u8; 0x8000];
        data[0..3].copy_from_slice(&[0x7C, 0x00, 0x81]);
        data[0x10] = 0x00;
        data[0x20] = 0x00;
        data[0x100..0x104].copy_from_slice(&[0x10, 0x80, 0x20, 0x80]);
        let rom = Rom::new(data);

        let mut analysis = Analysis::new(rom);
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.declare_jump_table(0x8000, 0, 2, 2, JumpTableStatus::Complete);
        analysis.run();

        let refs = analysis.references_from(0x8000).unwrap();
        assert!(refs.iter().any(|r| r.target == 0x8010));
        assert!(refs.iter().any(|r| r.target == 0x8020));
        assert!(analysis.any_instruction(0x8010).is_some());
        assert!(analysis.any_instruction(0x8020).is_some());

        let sub = analysis.subroutines().get(&0x8000).unwrap();
        assert!(sub.is_unknown());
        let reason = sub.unknown_state_changes().iter().next().unwrap().unknown_reason();
        assert_eq!(reason, Some(UnknownReason::SuspectInstruction));
    }

    #[test]
    fn test_instruction_assertion_merges_into_return_state() {
        // NOP; RTS -- an assertion on the NOP forces m=true before the RTS.
        let rom = rom_with_bytes(&[0xEA, 0x60]);
        let mut analysis = Analysis::new(rom);

        let mut change = StateChange::new_empty();
        change.set_m(true);
        analysis.add_assertion_instruction(0x8000, change);

        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        let sub = analysis.subroutines().get(&0x8000).unwrap();
        let recorded = *sub.known_state_changes().iter().next().unwrap();
        assert_eq!(recorded.m(), Some(true));
    }

    #[test]
    fn test_unknown_instruction_assertion_stops_the_walk() {
        use crate::snes::state::UnknownReason;

        // Three NOPs that would otherwise run past into zero-filled ROM.
        let rom = rom_with_bytes(&[0xEA, 0xEA, 0xEA]);
        let mut analysis = Analysis::new(rom);
        analysis.add_assertion_instruction(0x8000, StateChange::new_unknown(UnknownReason::SuspectInstruction));
        analysis.add_entry_point("reset", 0x8000, State::new(0));
        analysis.run();

        let sub = analysis.subroutines().get(&0x8000).unwrap();
        assert!(sub.is_unknown());
        assert_eq!(sub.instructions().len(), 1);
    }

    #[test]
    fn test_subroutine_assertion_takes_precedence_over_instruction() {
        let mut instruction_change = StateChange::new_empty();
        instruction_change.set_m(true);
        let mut subroutine_change = StateChange::new_empty();
        subroutine_change.set_m(false);

        let rom = rom_with_bytes(&[0xEA]);
        let mut analysis = Analysis::new(rom);
        analysis.add_assertion_instruction(0x8000, instruction_change);
        analysis.add_assertion_subroutine(0x8000, 0x8000, subroutine_change);

        let resolved = analysis.assertion_at(0x8000, 0x8000).unwrap();
        assert_eq!(resolved.m(), Some(false));
    }
}
