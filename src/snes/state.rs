use getset::CopyGetters;

const M_BIT: u8 = 0x20;
const X_BIT: u8 = 0x10;
const E_BIT: u8 = 0x01;

/// SNES processor status register (P), restricted to the three bits that
/// affect instruction decoding: `m` (accumulator width), `x` (index
/// register width), and `e` (emulation mode).
#[derive(Copy, Clone, CopyGetters, Debug, Eq, PartialEq, Hash)]
pub struct State {
    #[getset(get_copy = "pub")]
    p: u8,
}

impl State {
    /// Instantiate a state register from the raw value of P.
    pub fn new(p: u8) -> Self {
        Self { p }
    }

    /// Instantiate a state from explicit M/X/E values.
    pub fn from_mxe(m: bool, x: bool, e: bool) -> Self {
        let mut state = Self { p: 0 };
        state.set_m(m);
        state.set_x(x);
        state.set_e(e);
        state
    }

    /// Accumulator is 8-bit.
    pub fn m(&self) -> bool {
        self.p & M_BIT != 0
    }

    /// Index registers are 8-bit.
    pub fn x(&self) -> bool {
        self.p & X_BIT != 0
    }

    /// CPU is in 6502 emulation mode.
    pub fn e(&self) -> bool {
        self.p & E_BIT != 0
    }

    pub fn set_m(&mut self, m: bool) {
        self.set_bit(M_BIT, m);
    }

    pub fn set_x(&mut self, x: bool) {
        self.set_bit(X_BIT, x);
    }

    pub fn set_e(&mut self, e: bool) {
        self.set_bit(E_BIT, e);
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.p |= bit;
        } else {
            self.p &= !bit;
        }
    }

    /// Force the masked bits of P to 1, as SEP does.
    pub fn set(&mut self, mask: u8) {
        self.p |= mask & (M_BIT | X_BIT);
    }

    /// Force the masked bits of P to 0, as REP does.
    pub fn reset(&mut self, mask: u8) {
        self.p &= !(mask & (M_BIT | X_BIT));
    }

    /// Size in bytes of the accumulator given the current `m`.
    pub fn size_a(&self) -> usize {
        if self.m() {
            1
        } else {
            2
        }
    }

    /// Size in bytes of the index registers given the current `x`.
    pub fn size_x(&self) -> usize {
        if self.x() {
            1
        } else {
            2
        }
    }
}

#[cfg(test)]
mod test_state {
    use super::*;

    #[test]
    fn test_from_mxe() {
        let state = State::from_mxe(true, false, false);
        assert!(state.m());
        assert!(!state.x());
        assert!(!state.e());
    }

    #[test]
    fn test_size_ax() {
        let mut state = State::from_mxe(true, true, false);
        assert_eq!(state.size_a(), 1);
        assert_eq!(state.size_x(), 1);

        state.reset(0b0011_0000);
        assert_eq!(state.size_a(), 2);
        assert_eq!(state.size_x(), 2);
    }

    #[test]
    fn test_set() {
        let mut state = State::new(0b0000_0000);

        state.set(0b0000_0000);
        assert_eq!(state.p(), 0b0000_0000);

        state.set(0b1111_1111);
        assert_eq!(state.p(), 0b0011_0000);
    }

    #[test]
    fn test_reset() {
        let mut state = State::new(0b1111_1111);

        state.reset(0b0000_0000);
        assert_eq!(state.p(), 0b1111_1111);

        state.reset(0b1111_1111);
        assert_eq!(state.p(), 0b1100_1111);
    }

    #[test]
    fn test_set_reset_mx() {
        let mut state = State::new(0b0000_0000);

        state.set_m(true);
        state.set_x(true);
        assert!(state.m());
        assert!(state.x());

        state.set_m(false);
        state.set_x(false);
        assert!(!state.m());
        assert!(!state.x());
    }
}

/// Closed set of reasons a [`StateChange`] can be unknown, per the
/// analysis's dead-end taxonomy.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UnknownReason {
    /// Control flow went through a jump/call whose target could not be
    /// resolved statically (and no jump table covers it).
    IndirectJump,
    /// Execution reached a RAM address.
    MutableCode,
    /// The shadow stack detected a push/pop mismatch.
    StackManipulation,
    /// A callee returned with more than one distinct known state change.
    MultipleReturnStates,
    /// BRK or COP was executed.
    SuspectInstruction,
    /// Propagated from an unknown callee.
    Unknown,
}

/// State change caused by the execution of a code path: an independent
/// tri-state delta for `m` and `x`, or a tag explaining why no
/// deterministic delta could be computed.
///
/// `None` for a field means "no change observed for this flag along this
/// path", not "the flag is false". A state change with `unknown_reason` set
/// dominates: its `m`/`x` fields carry no information and must not be
/// consulted.
#[derive(Copy, CopyGetters, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StateChange {
    #[getset(get_copy = "pub")]
    m: Option<bool>,

    #[getset(get_copy = "pub")]
    x: Option<bool>,

    unknown_reason: Option<UnknownReason>,
}

impl StateChange {
    /// Instantiate an empty state change (no changes, not unknown).
    pub fn new_empty() -> Self {
        Self {
            m: None,
            x: None,
            unknown_reason: None,
        }
    }

    /// Instantiate an unknown state change.
    pub fn new_unknown(reason: UnknownReason) -> Self {
        Self {
            m: None,
            x: None,
            unknown_reason: Some(reason),
        }
    }

    /// Return true if the state is unknown, false otherwise.
    pub fn unknown(&self) -> bool {
        self.unknown_reason.is_some()
    }

    pub fn unknown_reason(&self) -> Option<UnknownReason> {
        self.unknown_reason
    }

    /// Set a state change for M.
    pub fn set_m(&mut self, m: bool) {
        self.m = Some(m);
    }

    /// Set a state change for X.
    pub fn set_x(&mut self, x: bool) {
        self.x = Some(x);
    }

    /// Set bits changed to 1 in P, as SEP does.
    pub fn set(&mut self, p_change: u8) {
        let change = State::new(p_change);
        self.m = if change.m() { Some(true) } else { self.m };
        self.x = if change.x() { Some(true) } else { self.x };
    }

    /// Set bits changed to 0 in P, as REP does.
    pub fn reset(&mut self, p_change: u8) {
        let change = State::new(p_change);
        self.m = if change.m() { Some(false) } else { self.m };
        self.x = if change.x() { Some(false) } else { self.x };
    }

    /// Drop any recorded change that an inference already told us was a
    /// no-op: if the inferred entry value for a flag equals the value this
    /// change claims to set it to, the change carries no new information.
    pub fn apply_inference(&mut self, inference: StateChange) {
        if self.m.is_some() && self.m == inference.m {
            self.m = None;
        }
        if self.x.is_some() && self.x == inference.x {
            self.x = None;
        }
    }
}

impl std::fmt::Display for StateChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(reason) = self.unknown_reason {
            return write!(f, "unknown ({:?})", reason);
        }
        match (self.m, self.x) {
            (None, None) => write!(f, "no change"),
            (m, x) => {
                let mut parts = Vec::new();
                if let Some(m) = m {
                    parts.push(format!("m={}", m as u8));
                }
                if let Some(x) = x {
                    parts.push(format!("x={}", x as u8));
                }
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod test_state_change {
    use super::*;

    #[test]
    fn test_set() {
        let mut state_change = StateChange::new_empty();
        state_change.set(0b0011_0000);

        assert!(state_change.m().unwrap());
        assert!(state_change.x().unwrap());
    }

    #[test]
    fn test_reset() {
        let mut state_change = StateChange::new_empty();
        state_change.reset(0b0011_0000);

        assert!(!state_change.m().unwrap());
        assert!(!state_change.x().unwrap());
    }

    #[test]
    fn test_unknown_dominates() {
        let change = StateChange::new_unknown(UnknownReason::IndirectJump);
        assert!(change.unknown());
        assert_eq!(change.unknown_reason(), Some(UnknownReason::IndirectJump));
    }

    #[test]
    fn test_apply_inference_clears_noop_change() {
        let mut change = StateChange::new_empty();
        change.set_m(true);

        let mut inference = StateChange::new_empty();
        inference.set_m(true);

        change.apply_inference(inference);
        assert_eq!(change.m(), None);
    }

    #[test]
    fn test_apply_inference_keeps_real_change() {
        let mut change = StateChange::new_empty();
        change.set_m(false);

        let mut inference = StateChange::new_empty();
        inference.set_m(true);

        change.apply_inference(inference);
        assert_eq!(change.m(), Some(false));
    }
}
