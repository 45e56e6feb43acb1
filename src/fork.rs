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
use std::cmp::Ordering;
use std::fmt;

// ===================================================================
// EIPS
// ===================================================================

pub const EIP_1559: EIP = EIP("Fee market change for ETH 1.0 chain");
pub const EIP_2565: EIP = EIP("ModExp Gas Cost");
pub const EIP_2929: EIP = EIP("Gas cost increases for state access opcodes");
pub const EIP_2718: EIP = EIP("Typed Transaction Envelope");
pub const EIP_2930: EIP = EIP("Optional access lists");
pub const EIP_3198: EIP = EIP("BASEFEE opcode");
pub const EIP_3529: EIP = EIP("Reduction in refunds");
pub const EIP_3541: EIP = EIP("Reject new contract code starting with the 0xEF byte");
pub const EIP_3554: EIP = EIP("Difficulty Bomb Delay to December 2021");
pub const EIP_3651: EIP = EIP("Warm COINBASE");
pub const EIP_3675: EIP = EIP("Upgrade consensus to Proof-of-Stake");
pub const EIP_3855: EIP = EIP("PUSH0 instruction");
pub const EIP_3860: EIP = EIP("Limit and meter initcode");
pub const EIP_4345: EIP = EIP("Difficulty Bomb Delay to June 2022");
pub const EIP_4399: EIP = EIP("Supplant DIFFICULTY opcode with PREVRANDAO");
pub const EIP_4895: EIP = EIP("Beacon chain push withdrawals as operations");
pub const EIP_5133: EIP = EIP("Delaying Difficulty Bomb to mid-September 2022");

// ===================================================================
// Forks
// ===================================================================

pub const HOMESTEAD: Fork = Fork { name: "homestead", id: 2016_03_14, eips: &[] };
pub const TANGERINE_WHISTLE: Fork = Fork { name: "tangerine_whistle", id: 2016_10_18, eips: &[] };
pub const SPURIOUS_DRAGON: Fork = Fork { name: "spurious_dragon", id: 2016_11_22, eips: &[] };
pub const BYZANTIUM: Fork = Fork { name: "byzantium", id: 2017_10_16, eips: &[] };
pub const CONSTANTINOPLE_PETERSBURG: Fork = Fork { name: "constantinople", id: 2019_02_28, eips: &[] };
pub const ISTANBUL: Fork = Fork { name: "istanbul", id: 2019_12_07, eips: &[] };
pub const MUIR_GLACIER: Fork = Fork { name: "muir_glacier", id: 2020_01_02, eips: &[] };

pub const BERLIN: Fork = Fork { name: "berlin", id: 2021_04_15, eips: &[EIP_2565, EIP_2929, EIP_2718, EIP_2930] };
pub const LONDON: Fork = Fork { name: "london", id: 2021_08_05, eips: &[EIP_1559, EIP_3198, EIP_3529, EIP_3541, EIP_3554] };
pub const ARROW_GLACIER: Fork = Fork { name: "arrow_glacier", id: 2021_12_09, eips: &[EIP_4345] };
pub const GRAY_GLACIER: Fork = Fork { name: "gray_glacier", id: 2022_06_30, eips: &[EIP_5133] };
pub const PARIS: Fork = Fork { name: "paris", id: 2022_09_15, eips: &[EIP_3675, EIP_4399] };
pub const SHANGHAI: Fork = Fork { name: "shanghai", id: 2023_04_12, eips: &[EIP_3651, EIP_3855, EIP_3860, EIP_4895] };

/// All known forks, oldest first. Used by [`Fork::by_name`] and as the
/// default fork when `#pragma target` is absent.
pub const ALL: &[Fork] = &[
    HOMESTEAD, TANGERINE_WHISTLE, SPURIOUS_DRAGON, BYZANTIUM, CONSTANTINOPLE_PETERSBURG,
    ISTANBUL, MUIR_GLACIER, BERLIN, LONDON, ARROW_GLACIER, GRAY_GLACIER, PARIS, SHANGHAI,
];

// ===================================================================
// EIP
// ===================================================================

/// Represents a specific EIP supported by this system.  EIPs are
/// distinct from `Fork`s because they represent an atomic changes
/// between forks.
#[derive(Debug,Clone,Copy,Eq,PartialEq)]
pub struct EIP(&'static str);

impl fmt::Display for EIP {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ===================================================================
// Fork Definition
// ===================================================================

/// Represents a top-level `Fork` in the Ethereum system.  A `Fork` is
/// just a collection of the active EIPs.  Thus, code can be
/// parameterised by querying the active fork to ascertain whether a
/// specific `EIP` is enabled or not.
#[derive(Debug,Clone,Copy,Eq,PartialEq)]
pub struct Fork {
    /// Name used in `#pragma target "name"` and on the command line.
    name: &'static str,
    /// Fork identifier which uniquely determines the fork based on
    /// its activation date.
    id: usize,
    /// List of EIPs activated by this fork.
    eips: &'static [EIP]
}

impl Fork {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up a fork by its `#pragma target` / CLI name.
    pub fn by_name(name: &str) -> Option<Fork> {
        ALL.iter().find(|f| f.name == name).copied()
    }

    /// Determine whether a given EIP is active for this fork, either
    /// because this fork introduced it or an earlier fork did.
    pub fn contains(&self, eip: EIP) -> bool {
        ALL.iter()
            .filter(|f| f.id <= self.id)
            .any(|f| f.eips.contains(&eip))
    }

    /// Whether this fork supports the `PUSH0` instruction (EIP-3855).
    pub fn supports_push0(&self) -> bool {
        self.contains(EIP_3855)
    }
}

impl Default for Fork {
    /// The fork used when no `#pragma target` is given.
    fn default() -> Self {
        SHANGHAI
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialOrd for Fork {
    fn partial_cmp(&self, other: &Fork) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fork {
    fn cmp(&self, other: &Fork) -> Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shanghai_supports_push0() {
        assert!(SHANGHAI.supports_push0());
        assert!(!BERLIN.supports_push0());
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(Fork::by_name("berlin"), Some(BERLIN));
        assert_eq!(Fork::by_name("nonexistent"), None);
    }

    #[test]
    fn ordering_follows_activation_date() {
        assert!(BERLIN < LONDON);
        assert!(SHANGHAI > PARIS);
    }
}
