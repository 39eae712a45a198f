use crate::analysis::Analysis;
use crate::rom::Rom;
use crate::snes::instruction::{Instruction, InstructionType};
use crate::snes::opcodes::Op;
use crate::snes::stack::{Data, Stack};
use crate::snes::state::{State, StateChange, UnknownReason};

/// Abstract symbolic executor for 65816 code (spec component J).
///
/// A `Cpu` value is the entire state of one depth-first walk:
/// `(pc, subroutine_pc, state, state_change, state_inference, stack, stop)`.
/// Branches and calls fork this value by cloning it and letting the clone
/// run to completion before the parent continues — there is no real
/// concurrency, only recursive, by-value forking. The `Analysis` being
/// built is threaded through as `&mut` rather than stored on the struct, so
/// forking never has to reconcile two live mutable borrows of it.
///
/// Named `Cpu` rather than the upstream `CPU`, for the same reason as
/// `Rom`/`ROM` (see `src/rom.rs`): `clippy::upper_case_acronyms` warns on
/// all-caps type names by default.
#[derive(Clone)]
pub struct Cpu {
    pc: usize,
    subroutine_pc: usize,
    state: State,
    state_change: StateChange,
    state_inference: StateChange,
    stack: Stack,
    /// Stack pointer this walk's subroutine body started at: 0 for an
    /// entry point (nothing pushed yet), or the pointer right after the
    /// calling JSR/JSL pushed its return address, for a callee. A return
    /// pop is only checked against matching call instructions when the
    /// stack is back at this depth — see `check_return_manipulation`.
    base_pointer: isize,
    stop: bool,
}

impl Cpu {
    /// Instantiate a CPU ready to walk a subroutine starting at `pc` under
    /// `state`. Used both for entry points and for each call's callee.
    pub fn new(pc: usize, subroutine_pc: usize, state: State) -> Self {
        Self {
            pc,
            subroutine_pc,
            state,
            state_change: StateChange::new_empty(),
            state_inference: StateChange::new_empty(),
            stack: Stack::new(),
            base_pointer: 0,
            stop: false,
        }
    }

    /// Run until this walk reaches a dead end or a standard return.
    pub fn run(&mut self, analysis: &mut Analysis) {
        while !self.stop {
            self.step(analysis);
        }
    }

    fn step(&mut self, analysis: &mut Analysis) {
        if Rom::is_ram(self.pc) {
            return self.unknown_state_change(analysis, UnknownReason::MutableCode);
        }

        let opcode = analysis.rom().read_byte(self.pc);
        let argument = analysis.rom().read_address(self.pc + 1);

        match analysis.add_instruction(self.pc, self.subroutine_pc, opcode, argument, self.state) {
            Some(instruction) => self.execute(analysis, instruction),
            // Already visited this (pc, state): fixed point reached on this path.
            None => self.stop = true,
        }
    }

    fn execute(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        self.pc += instruction.size();
        self.derive_state_inference(&instruction);

        if let Some(change) = analysis.assertion_at(instruction.pc(), self.subroutine_pc) {
            if change.unknown() {
                return self.unknown_state_change(analysis, change.unknown_reason().unwrap());
            }
            self.apply_state_change(change);
        }

        match instruction.category() {
            InstructionType::Branch => self.branch(analysis, instruction),
            InstructionType::Call => self.call(analysis, instruction),
            InstructionType::Interrupt => self.interrupt(analysis, instruction),
            InstructionType::Jump => self.jump(analysis, instruction),
            InstructionType::Return => self.ret(analysis, instruction),
            InstructionType::SepRep => self.sep_rep(instruction),
            InstructionType::Pop => self.pop(analysis, instruction),
            InstructionType::Push => self.push(instruction),
            InstructionType::Other => {}
        }
    }

    /// Fork a parallel walk for the not-taken path, then take the branch.
    fn branch(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        let mut not_taken = self.clone();
        not_taken.run(analysis);

        let target = instruction
            .absolute_argument()
            .expect("branch targets are always PC-relative and fully resolved");
        analysis.add_reference(instruction.pc(), target, self.subroutine_pc);
        self.pc = target;
    }

    fn call(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        let target = match instruction.absolute_argument() {
            Some(target) => target,
            None => return self.unknown_state_change(analysis, UnknownReason::IndirectJump),
        };

        analysis.add_subroutine(target);
        analysis.add_reference(instruction.pc(), target, self.subroutine_pc);

        let mut callee = Cpu::new(target, target, self.state);
        callee.stack = self.stack.clone();
        match instruction.operation() {
            Op::JSR => callee.stack.push(instruction, Data::None, 2),
            Op::JSL => callee.stack.push(instruction, Data::None, 3),
            op => unreachable!("unexpected call operation {:?}", op),
        }
        callee.base_pointer = callee.stack.pointer();
        callee.run(analysis);

        self.propagate_subroutine_state(analysis, target);
    }

    fn interrupt(&mut self, analysis: &mut Analysis, _instruction: Instruction) {
        self.unknown_state_change(analysis, UnknownReason::SuspectInstruction);
    }

    fn jump(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        if let Some(target) = instruction.absolute_argument() {
            analysis.add_reference(instruction.pc(), target, self.subroutine_pc);
            self.pc = target;
            return;
        }

        if let Some(table) = analysis.jump_table_at(instruction.pc()) {
            let targets: Vec<usize> = table.targets().values().copied().collect();
            for &target in &targets {
                analysis.add_reference(instruction.pc(), target, self.subroutine_pc);
            }
            let mut targets = targets.into_iter();
            if let Some(first) = targets.next() {
                for target in targets {
                    let mut fork = self.clone();
                    fork.pc = target;
                    fork.run(analysis);
                }
                self.pc = first;
                return;
            }
        }

        self.unknown_state_change(analysis, UnknownReason::IndirectJump);
    }

    fn ret(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        if instruction.operation() == Op::RTI {
            return self.standard_ret(analysis);
        }

        let ret_size = if instruction.operation() == Op::RTS { 2 } else { 3 };
        let balanced = self.stack.pointer() == self.base_pointer;
        let entries = self.stack.pop(ret_size);
        if Self::check_return_manipulation(instruction.operation(), &entries, balanced) {
            return self.unknown_state_change(analysis, UnknownReason::StackManipulation);
        }
        self.standard_ret(analysis);
    }

    fn standard_ret(&mut self, analysis: &mut Analysis) {
        let pc = self.pc;
        let state_change = self.state_change;
        analysis
            .subroutine_mut(self.subroutine_pc)
            .add_state_change(pc, state_change);
        self.stop = true;
    }

    fn sep_rep(&mut self, instruction: Instruction) {
        let arg = instruction
            .absolute_argument()
            .expect("SEP/REP always decode an immediate 8-bit mask") as u8;

        match instruction.operation() {
            Op::SEP => {
                self.state.set(arg);
                self.state_change.set(arg);
            }
            Op::REP => {
                self.state.reset(arg);
                self.state_change.reset(arg);
            }
            op => unreachable!("unexpected SEP/REP operation {:?}", op),
        }

        self.state_change.apply_inference(self.state_inference);
    }

    fn pop(&mut self, analysis: &mut Analysis, instruction: Instruction) {
        match instruction.operation() {
            Op::PLP => {
                let entry = self.stack.pop_one();
                match (entry.instruction, entry.data) {
                    (Some(pusher), Data::State(state, state_change)) if pusher.operation() == Op::PHP => {
                        self.state = state;
                        self.state_change = state_change;
                    }
                    _ => return self.unknown_state_change(analysis, UnknownReason::StackManipulation),
                }
            }
            Op::PLA => {
                self.stack.pop(self.state.size_a());
            }
            Op::PLX | Op::PLY => {
                self.stack.pop(self.state.size_x());
            }
            Op::PLB => {
                self.stack.pop_one();
            }
            Op::PLD => {
                self.stack.pop(2);
            }
            op => unreachable!("unexpected pop operation {:?}", op),
        }
    }

    fn push(&mut self, instruction: Instruction) {
        match instruction.operation() {
            Op::PHP => self.stack.push_state(instruction, self.state, self.state_change),
            Op::PHA => self.stack.push(instruction, Data::None, self.state.size_a()),
            Op::PHX | Op::PHY => self.stack.push(instruction, Data::None, self.state.size_x()),
            Op::PHB | Op::PHK => self.stack.push(instruction, Data::None, 1),
            Op::PHD | Op::PEA | Op::PER | Op::PEI => self.stack.push(instruction, Data::None, 2),
            op => unreachable!("unexpected push operation {:?}", op),
        }
    }

    /// Merge a resolved state change (an assertion, or a propagated callee
    /// return) into both the live state and the accumulated change.
    fn apply_state_change(&mut self, change: StateChange) {
        if let Some(m) = change.m() {
            self.state.set_m(m);
            self.state_change.set_m(m);
        }
        if let Some(x) = change.x() {
            self.state.set_x(x);
            self.state_change.set_x(x);
        }
    }

    /// A return is manipulated if the walk's own pushes/pops never
    /// balanced back out before reaching it (net stack depth shifted), or
    /// if a popped byte that *is* tracked was placed by something other
    /// than the matching call instruction. A tracked-but-absent entry
    /// (nothing was ever pushed this deep) is not itself manipulation —
    /// that's the ordinary case at a true entry point, where there is no
    /// enclosing JSR/JSL frame to match against at all.
    fn check_return_manipulation(op: Op, entries: &[crate::snes::stack::Entry], balanced: bool) -> bool {
        if !balanced {
            return true;
        }
        for entry in entries {
            let caller = match entry.instruction {
                Some(caller) => caller,
                None => continue,
            };
            match op {
                Op::RTS if caller.operation() != Op::JSR => return true,
                Op::RTL if caller.operation() != Op::JSL => return true,
                _ => {}
            }
        }
        false
    }

    /// If this instruction's operand size depends on a flag we haven't
    /// already recorded a change for, the decode itself tells us what that
    /// flag must have been at subroutine entry.
    fn derive_state_inference(&mut self, instruction: &Instruction) {
        use crate::snes::opcodes::AddressMode;
        if instruction.address_mode() == AddressMode::ImmediateM && self.state_change.m().is_none() {
            self.state_inference.set_m(self.state.m());
        }
        if instruction.address_mode() == AddressMode::ImmediateX && self.state_change.x().is_none() {
            self.state_inference.set_x(self.state.x());
        }
    }

    /// Pull a callee's resolved return state into this walk, or stop with
    /// the appropriate unknown reason if the callee couldn't be resolved.
    fn propagate_subroutine_state(&mut self, analysis: &mut Analysis, target: usize) {
        let subroutine = analysis.subroutines().get(&target).expect("callee subroutine must exist");

        if subroutine.is_unknown() {
            return self.unknown_state_change(analysis, UnknownReason::Unknown);
        }

        let known = subroutine.known_state_changes();
        if known.len() == 1 {
            let change = *known.iter().next().unwrap();
            self.apply_state_change(change);
        } else {
            self.unknown_state_change(analysis, UnknownReason::MultipleReturnStates);
        }
    }

    fn unknown_state_change(&mut self, analysis: &mut Analysis, reason: UnknownReason) {
        log::debug!(
            "subroutine {:#08x}: walk stopped at {:#08x}: {:?}",
            self.subroutine_pc,
            self.pc,
            reason
        );
        let pc = self.pc;
        analysis
            .subroutine_mut(self.subroutine_pc)
            .add_state_change(pc, StateChange::new_unknown(reason));
        self.stop = true;
    }
}
