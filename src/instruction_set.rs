// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use crate::evm::opcode;
use crate::fork::{self, Fork};

/// External collaborator (§1) the assembler core consumes: something which
/// resolves opcode mnemonics to bytes, reports the fork an opcode was
/// added in (or removed from), and answers whether `PUSH0` is available.
/// The core never hard-codes an opcode table of its own; it always goes
/// through this trait so callers can substitute their own instruction set
/// (e.g. for a fork the default table doesn't model).
pub trait InstructionSet {
    /// Resolve a (case-insensitive) mnemonic to its opcode byte. `PUSHn`
    /// mnemonics (`PUSH1`..`PUSH32`) and `PUSH0` are resolved here too.
    fn encode(&self, name: &str) -> Option<u8>;

    /// Resolve an opcode byte back to its canonical upper-case mnemonic.
    fn decode(&self, opcode: u8) -> Option<&'static str>;

    /// The fork this instruction set reports positions against.
    fn fork(&self) -> Fork;

    /// Whether `PUSH0` is available under the active fork.
    fn supports_push0(&self) -> bool {
        self.fork().supports_push0()
    }

    /// The fork in which `name` was introduced, if known. `None` means
    /// either the opcode is unknown, or has been available since the
    /// earliest fork this table models.
    fn introduced_in(&self, name: &str) -> Option<Fork>;
}

/// Table-driven [`InstructionSet`] built from the standard legacy opcode
/// map, parameterised by a target [`Fork`].
pub struct DefaultInstructionSet {
    fork: Fork,
}

impl DefaultInstructionSet {
    pub fn new(fork: Fork) -> Self {
        DefaultInstructionSet { fork }
    }
}

impl InstructionSet for DefaultInstructionSet {
    fn encode(&self, name: &str) -> Option<u8> {
        let upper = name.to_ascii_uppercase();
        if upper == "PUSH0" {
            return if self.fork.supports_push0() { Some(opcode::PUSH0) } else { None };
        }
        if let Some(n) = upper.strip_prefix("PUSH") {
            if let Ok(size) = n.parse::<u8>() {
                if (1..=32).contains(&size) {
                    return Some(opcode::PUSH1 + (size - 1));
                }
            }
        }
        OPCODES
            .iter()
            .find(|(n, _, introduced)| *n == upper && introduced.map_or(true, |f| self.fork >= f))
            .map(|(_, op, _)| *op)
    }

    fn decode(&self, op: u8) -> Option<&'static str> {
        if op == opcode::PUSH0 {
            return Some("PUSH0");
        }
        if (opcode::PUSH1..=opcode::PUSH32).contains(&op) {
            // Leaked once per distinct push size; acceptable, these are rare.
            return PUSH_NAMES.get((op - opcode::PUSH1) as usize).copied();
        }
        OPCODES.iter().find(|(_, o, _)| *o == op).map(|(n, _, _)| *n)
    }

    fn fork(&self) -> Fork {
        self.fork
    }

    fn introduced_in(&self, name: &str) -> Option<Fork> {
        let upper = name.to_ascii_uppercase();
        if upper == "PUSH0" {
            return Some(fork::SHANGHAI);
        }
        OPCODES.iter().find(|(n, _, _)| *n == upper).and_then(|(_, _, f)| *f)
    }
}

const PUSH_NAMES: [&str; 32] = [
    "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8",
    "PUSH9", "PUSH10", "PUSH11", "PUSH12", "PUSH13", "PUSH14", "PUSH15", "PUSH16",
    "PUSH17", "PUSH18", "PUSH19", "PUSH20", "PUSH21", "PUSH22", "PUSH23", "PUSH24",
    "PUSH25", "PUSH26", "PUSH27", "PUSH28", "PUSH29", "PUSH30", "PUSH31", "PUSH32",
];

/// `(mnemonic, opcode, fork introduced in)`. Non-push opcodes only; push
/// opcodes are handled specially above since they are a contiguous range.
const OPCODES: &[(&str, u8, Option<Fork>)] = &[
    ("STOP", opcode::STOP, None),
    ("ADD", opcode::ADD, None),
    ("MUL", opcode::MUL, None),
    ("SUB", opcode::SUB, None),
    ("DIV", opcode::DIV, None),
    ("SDIV", opcode::SDIV, None),
    ("MOD", opcode::MOD, None),
    ("SMOD", opcode::SMOD, None),
    ("ADDMOD", opcode::ADDMOD, None),
    ("MULMOD", opcode::MULMOD, None),
    ("EXP", opcode::EXP, None),
    ("SIGNEXTEND", opcode::SIGNEXTEND, None),
    ("LT", opcode::LT, None),
    ("GT", opcode::GT, None),
    ("SLT", opcode::SLT, None),
    ("SGT", opcode::SGT, None),
    ("EQ", opcode::EQ, None),
    ("ISZERO", opcode::ISZERO, None),
    ("AND", opcode::AND, None),
    ("OR", opcode::OR, None),
    ("XOR", opcode::XOR, None),
    ("NOT", opcode::NOT, None),
    ("BYTE", opcode::BYTE, None),
    ("SHL", opcode::SHL, Some(fork::CONSTANTINOPLE_PETERSBURG)),
    ("SHR", opcode::SHR, Some(fork::CONSTANTINOPLE_PETERSBURG)),
    ("SAR", opcode::SAR, Some(fork::CONSTANTINOPLE_PETERSBURG)),
    ("KECCAK256", opcode::KECCAK256, None),
    ("ADDRESS", opcode::ADDRESS, None),
    ("BALANCE", opcode::BALANCE, None),
    ("ORIGIN", opcode::ORIGIN, None),
    ("CALLER", opcode::CALLER, None),
    ("CALLVALUE", opcode::CALLVALUE, None),
    ("CALLDATALOAD", opcode::CALLDATALOAD, None),
    ("CALLDATASIZE", opcode::CALLDATASIZE, None),
    ("CALLDATACOPY", opcode::CALLDATACOPY, None),
    ("CODESIZE", opcode::CODESIZE, None),
    ("CODECOPY", opcode::CODECOPY, None),
    ("GASPRICE", opcode::GASPRICE, None),
    ("EXTCODESIZE", opcode::EXTCODESIZE, None),
    ("EXTCODECOPY", opcode::EXTCODECOPY, None),
    ("RETURNDATASIZE", opcode::RETURNDATASIZE, Some(fork::BYZANTIUM)),
    ("RETURNDATACOPY", opcode::RETURNDATACOPY, Some(fork::BYZANTIUM)),
    ("EXTCODEHASH", opcode::EXTCODEHASH, Some(fork::CONSTANTINOPLE_PETERSBURG)),
    ("BLOCKHASH", opcode::BLOCKHASH, None),
    ("COINBASE", opcode::COINBASE, None),
    ("TIMESTAMP", opcode::TIMESTAMP, None),
    ("NUMBER", opcode::NUMBER, None),
    ("DIFFICULTY", opcode::DIFFICULTY, None),
    ("GASLIMIT", opcode::GASLIMIT, None),
    ("CHAINID", opcode::CHAINID, Some(fork::ISTANBUL)),
    ("SELFBALANCE", opcode::SELFBALANCE, Some(fork::ISTANBUL)),
    ("POP", opcode::POP, None),
    ("MLOAD", opcode::MLOAD, None),
    ("MSTORE", opcode::MSTORE, None),
    ("MSTORE8", opcode::MSTORE8, None),
    ("SLOAD", opcode::SLOAD, None),
    ("SSTORE", opcode::SSTORE, None),
    ("JUMP", opcode::JUMP, None),
    ("JUMPI", opcode::JUMPI, None),
    ("PC", opcode::PC, None),
    ("MSIZE", opcode::MSIZE, None),
    ("GAS", opcode::GAS, None),
    ("JUMPDEST", opcode::JUMPDEST, None),
    ("DUP1", opcode::DUP1, None),
    ("DUP2", opcode::DUP2, None),
    ("DUP3", opcode::DUP3, None),
    ("DUP4", opcode::DUP4, None),
    ("DUP5", opcode::DUP5, None),
    ("DUP6", opcode::DUP6, None),
    ("DUP7", opcode::DUP7, None),
    ("DUP8", opcode::DUP8, None),
    ("DUP9", opcode::DUP9, None),
    ("DUP10", opcode::DUP10, None),
    ("DUP11", opcode::DUP11, None),
    ("DUP12", opcode::DUP12, None),
    ("DUP13", opcode::DUP13, None),
    ("DUP14", opcode::DUP14, None),
    ("DUP15", opcode::DUP15, None),
    ("DUP16", opcode::DUP16, None),
    ("SWAP1", opcode::SWAP1, None),
    ("SWAP2", opcode::SWAP2, None),
    ("SWAP3", opcode::SWAP3, None),
    ("SWAP4", opcode::SWAP4, None),
    ("SWAP5", opcode::SWAP5, None),
    ("SWAP6", opcode::SWAP6, None),
    ("SWAP7", opcode::SWAP7, None),
    ("SWAP8", opcode::SWAP8, None),
    ("SWAP9", opcode::SWAP9, None),
    ("SWAP10", opcode::SWAP10, None),
    ("SWAP11", opcode::SWAP11, None),
    ("SWAP12", opcode::SWAP12, None),
    ("SWAP13", opcode::SWAP13, None),
    ("SWAP14", opcode::SWAP14, None),
    ("SWAP15", opcode::SWAP15, None),
    ("SWAP16", opcode::SWAP16, None),
    ("LOG0", opcode::LOG0, None),
    ("LOG1", opcode::LOG1, None),
    ("LOG2", opcode::LOG2, None),
    ("LOG3", opcode::LOG3, None),
    ("LOG4", opcode::LOG4, None),
    ("CREATE", opcode::CREATE, None),
    ("CALL", opcode::CALL, None),
    ("CALLCODE", opcode::CALLCODE, None),
    ("RETURN", opcode::RETURN, None),
    ("DELEGATECALL", opcode::DELEGATECALL, Some(fork::HOMESTEAD)),
    ("CREATE2", opcode::CREATE2, Some(fork::CONSTANTINOPLE_PETERSBURG)),
    ("STATICCALL", opcode::STATICCALL, Some(fork::BYZANTIUM)),
    ("REVERT", opcode::REVERT, Some(fork::BYZANTIUM)),
    ("INVALID", opcode::INVALID, None),
    ("SELFDESTRUCT", opcode::SELFDESTRUCT, None),
];

/// Opcodes which unconditionally transfer control and after which any
/// fall-through instruction (other than a `JUMPDEST`) is unreachable.
/// Used by the analysis pass (C8); `JUMP` is handled separately there since
/// it is unconditional only when it's the *last* instruction of its kind.
pub const TERMINAL_OPCODES: &[u8] = &[
    opcode::STOP,
    opcode::RETURN,
    opcode::REVERT,
    opcode::INVALID,
    opcode::SELFDESTRUCT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_roundtrip() {
        let set = DefaultInstructionSet::new(fork::SHANGHAI);
        assert_eq!(set.encode("add"), Some(opcode::ADD));
        assert_eq!(set.encode("ADD"), Some(opcode::ADD));
        assert_eq!(set.decode(opcode::ADD), Some("ADD"));
    }

    #[test]
    fn push0_depends_on_fork() {
        let shanghai = DefaultInstructionSet::new(fork::SHANGHAI);
        let berlin = DefaultInstructionSet::new(fork::BERLIN);
        assert_eq!(shanghai.encode("push0"), Some(opcode::PUSH0));
        assert_eq!(berlin.encode("push0"), None);
    }

    #[test]
    fn push_n_resolves_by_size() {
        let set = DefaultInstructionSet::new(fork::SHANGHAI);
        assert_eq!(set.encode("PUSH1"), Some(opcode::PUSH1));
        assert_eq!(set.encode("PUSH32"), Some(opcode::PUSH32));
        assert_eq!(set.decode(opcode::PUSH17), Some("PUSH17"));
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        let set = DefaultInstructionSet::new(fork::SHANGHAI);
        assert_eq!(set.encode("frobnicate"), None);
    }
}
