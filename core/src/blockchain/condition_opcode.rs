use serde::{Deserialize, Serialize};

pub const AGG_SIG_COST: u64 = 1_200_000;
pub const CREATE_COIN_COST: u64 = 1_800_000;

#[derive(Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum ConditionOpcode {
    AggSigUnsafe = 49,
    AggSigMe = 50,
    CreateCoin = 51,
    ReserveFee = 52,
    CreateCoinAnnouncement = 60,
    AssertCoinAnnouncement = 61,
    CreatePuzzleAnnouncement = 62,
    AssertPuzzleAnnouncement = 63,
    AssertConcurrentSpend = 64,
    AssertMyCoinId = 70,
    AssertMyParentId = 71,
    AssertMyPuzzlehash = 72,
    AssertMyAmount = 73,
    AssertSecondsRelative = 80,
    AssertSecondsAbsolute = 81,
    AssertHeightRelative = 82,
    AssertHeightAbsolute = 83,
    AssertBeforeSecondsRelative = 84,
    AssertBeforeSecondsAbsolute = 85,
    AssertBeforeHeightRelative = 86,
    AssertBeforeHeightAbsolute = 87,
}
impl ConditionOpcode {
    /// Opcodes are single byte atoms, anything else is unknown.
    #[must_use]
    pub fn from_atom(atom: &[u8]) -> Option<Self> {
        match atom {
            [v] => Self::try_from(*v).ok(),
            _ => None,
        }
    }
    #[must_use]
    pub const fn cost(&self) -> u64 {
        match self {
            ConditionOpcode::AggSigUnsafe | ConditionOpcode::AggSigMe => AGG_SIG_COST,
            ConditionOpcode::CreateCoin => CREATE_COIN_COST,
            _ => 0,
        }
    }
}
impl TryFrom<u8> for ConditionOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            49 => Ok(ConditionOpcode::AggSigUnsafe),
            50 => Ok(ConditionOpcode::AggSigMe),
            51 => Ok(ConditionOpcode::CreateCoin),
            52 => Ok(ConditionOpcode::ReserveFee),
            60 => Ok(ConditionOpcode::CreateCoinAnnouncement),
            61 => Ok(ConditionOpcode::AssertCoinAnnouncement),
            62 => Ok(ConditionOpcode::CreatePuzzleAnnouncement),
            63 => Ok(ConditionOpcode::AssertPuzzleAnnouncement),
            64 => Ok(ConditionOpcode::AssertConcurrentSpend),
            70 => Ok(ConditionOpcode::AssertMyCoinId),
            71 => Ok(ConditionOpcode::AssertMyParentId),
            72 => Ok(ConditionOpcode::AssertMyPuzzlehash),
            73 => Ok(ConditionOpcode::AssertMyAmount),
            80 => Ok(ConditionOpcode::AssertSecondsRelative),
            81 => Ok(ConditionOpcode::AssertSecondsAbsolute),
            82 => Ok(ConditionOpcode::AssertHeightRelative),
            83 => Ok(ConditionOpcode::AssertHeightAbsolute),
            84 => Ok(ConditionOpcode::AssertBeforeSecondsRelative),
            85 => Ok(ConditionOpcode::AssertBeforeSecondsAbsolute),
            86 => Ok(ConditionOpcode::AssertBeforeHeightRelative),
            87 => Ok(ConditionOpcode::AssertBeforeHeightAbsolute),
            other => Err(other),
        }
    }
}
