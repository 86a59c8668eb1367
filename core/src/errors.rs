use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Error;

macro_rules! error_codes {
    ($($variant:ident = $code:expr => $name:expr),* $(,)?) => {
        /// Consensus and mempool rejection reasons.
        #[repr(u16)]
        #[derive(Copy, Clone, Hash, PartialEq, Eq, Serialize, Deserialize, Debug)]
        pub enum ErrorCode {
            $($variant = $code),*
        }
        impl ErrorCode {
            #[must_use]
            pub const fn name(&self) -> &'static str {
                match self {
                    $(ErrorCode::$variant => $name),*
                }
            }
        }
        impl TryFrom<u16> for ErrorCode {
            type Error = Error;
            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $($code => Ok(ErrorCode::$variant),)*
                    _ => Err(Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Unknown ErrorCode: {value}"),
                    )),
                }
            }
        }
    };
}

error_codes! {
    Unknown = 1 => "UNKNOWN",
    InvalidBlockSolution = 2 => "INVALID_BLOCK_SOLUTION",
    InvalidCoinSolution = 3 => "INVALID_COIN_SOLUTION",
    DuplicateOutput = 4 => "DUPLICATE_OUTPUT",
    DoubleSpend = 5 => "DOUBLE_SPEND",
    UnknownUnspent = 6 => "UNKNOWN_UNSPENT",
    BadAggregateSignature = 7 => "BAD_AGGREGATE_SIGNATURE",
    WrongPuzzleHash = 8 => "WRONG_PUZZLE_HASH",
    InvalidCondition = 10 => "INVALID_CONDITION",
    AssertMyCoinIdFailed = 11 => "ASSERT_MY_COIN_ID_FAILED",
    AssertAnnounceConsumedFailed = 12 => "ASSERT_ANNOUNCE_CONSUMED_FAILED",
    AssertHeightRelativeFailed = 13 => "ASSERT_HEIGHT_RELATIVE_FAILED",
    AssertHeightAbsoluteFailed = 14 => "ASSERT_HEIGHT_ABSOLUTE_FAILED",
    AssertSecondsAbsoluteFailed = 15 => "ASSERT_SECONDS_ABSOLUTE_FAILED",
    CoinAmountExceedsMaximum = 16 => "COIN_AMOUNT_EXCEEDS_MAXIMUM",
    SexpError = 17 => "SEXP_ERROR",
    InvalidFeeLowFee = 18 => "INVALID_FEE_LOW_FEE",
    MempoolConflict = 19 => "MEMPOOL_CONFLICT",
    MintingCoin = 20 => "MINTING_COIN",
    ExtendsUnknownBlock = 21 => "EXTENDS_UNKNOWN_BLOCK",
    BlockCostExceedsMax = 23 => "BLOCK_COST_EXCEEDS_MAX",
    BadAdditionRoot = 24 => "BAD_ADDITION_ROOT",
    BadRemovalRoot = 25 => "BAD_REMOVAL_ROOT",
    InvalidPlotSignature = 29 => "INVALID_PLOT_SIGNATURE",
    TimestampTooFarInPast = 30 => "TIMESTAMP_TOO_FAR_IN_PAST",
    TimestampTooFarInFuture = 31 => "TIMESTAMP_TOO_FAR_IN_FUTURE",
    InvalidTransactionsFilterHash = 32 => "INVALID_TRANSACTIONS_FILTER_HASH",
    InvalidPospaceChallenge = 33 => "INVALID_POSPACE_CHALLENGE",
    InvalidPospace = 34 => "INVALID_POSPACE",
    InvalidHeight = 35 => "INVALID_HEIGHT",
    InvalidBlockFeeAmount = 38 => "INVALID_BLOCK_FEE_AMOUNT",
    InvalidWeight = 39 => "INVALID_WEIGHT",
    InvalidTotalIters = 40 => "INVALID_TOTAL_ITERS",
    BlockIsNotFinished = 41 => "BLOCK_IS_NOT_FINISHED",
    InvalidTransactionsGeneratorHash = 45 => "INVALID_TRANSACTIONS_GENERATOR_HASH",
    InvalidPoolTarget = 46 => "INVALID_POOL_TARGET",
    ReserveFeeConditionFailed = 48 => "RESERVE_FEE_CONDITION_FAILED",
    NotBlockButHasData = 49 => "NOT_BLOCK_BUT_HAS_DATA",
    IsTransactionBlockButNoData = 50 => "IS_TRANSACTION_BLOCK_BUT_NO_DATA",
    InvalidPrevBlockHash = 51 => "INVALID_PREV_BLOCK_HASH",
    InvalidTransactionsInfoHash = 52 => "INVALID_TRANSACTIONS_INFO_HASH",
    InvalidFoliageBlockHash = 53 => "INVALID_FOLIAGE_BLOCK_HASH",
    InvalidRewardCoins = 54 => "INVALID_REWARD_COINS",
    InvalidBlockCost = 55 => "INVALID_BLOCK_COST",
    NoEndOfSlotInfo = 56 => "NO_END_OF_SLOT_INFO",
    InvalidPrevChallengeSlotHash = 57 => "INVALID_PREV_CHALLENGE_SLOT_HASH",
    InvalidSubEpochSummaryHash = 58 => "INVALID_SUB_EPOCH_SUMMARY_HASH",
    NoSubEpochSummaryHash = 59 => "NO_SUB_EPOCH_SUMMARY_HASH",
    ShouldNotMakeChallengeBlock = 60 => "SHOULD_NOT_MAKE_CHALLENGE_BLOCK",
    ShouldMakeChallengeBlock = 61 => "SHOULD_MAKE_CHALLENGE_BLOCK",
    InvalidChallengeChainData = 62 => "INVALID_CHALLENGE_CHAIN_DATA",
    InvalidCcEosVdf = 65 => "INVALID_CC_EOS_VDF",
    InvalidRcEosVdf = 66 => "INVALID_RC_EOS_VDF",
    InvalidChallengeSlotHashRc = 67 => "INVALID_CHALLENGE_SLOT_HASH_RC",
    InvalidPriorPointRc = 68 => "INVALID_PRIOR_POINT_RC",
    InvalidDeficit = 69 => "INVALID_DEFICIT",
    InvalidSubEpochSummary = 70 => "INVALID_SUB_EPOCH_SUMMARY",
    InvalidPrevSubEpochSummaryHash = 71 => "INVALID_PREV_SUB_EPOCH_SUMMARY_HASH",
    InvalidRewardSubEpochSummaryHash = 72 => "INVALID_REWARD_SUB_EPOCH_SUMMARY_HASH",
    InvalidCcSpVdf = 75 => "INVALID_CC_SP_VDF",
    InvalidRcSpVdf = 76 => "INVALID_RC_SP_VDF",
    InvalidCcSignature = 77 => "INVALID_CC_SIGNATURE",
    InvalidRcSignature = 78 => "INVALID_RC_SIGNATURE",
    CannotMakeCcBlock = 79 => "CANNOT_MAKE_CC_BLOCK",
    InvalidRcSpPrevIp = 80 => "INVALID_RC_SP_PREV_IP",
    InvalidRcIpPrevIp = 81 => "INVALID_RC_IP_PREV_IP",
    InvalidIsTransactionBlock = 82 => "INVALID_IS_TRANSACTION_BLOCK",
    InvalidUrsbHash = 83 => "INVALID_URSB_HASH",
    OldPoolTarget = 84 => "OLD_POOL_TARGET",
    InvalidPoolSignature = 85 => "INVALID_POOL_SIGNATURE",
    InvalidFoliageBlockPresence = 86 => "INVALID_FOLIAGE_BLOCK_PRESENCE",
    InvalidCcIpVdf = 87 => "INVALID_CC_IP_VDF",
    InvalidRcIpVdf = 88 => "INVALID_RC_IP_VDF",
    IpShouldBeNone = 89 => "IP_SHOULD_BE_NONE",
    InvalidRewardBlockHash = 90 => "INVALID_REWARD_BLOCK_HASH",
    InvalidMadeNonOverflowInfusions = 91 => "INVALID_MADE_NON_OVERFLOW_INFUSIONS",
    NoOverflowsInFirstSubSlotNewEpoch = 92 => "NO_OVERFLOWS_IN_FIRST_SUB_SLOT_NEW_EPOCH",
    MempoolNotInitialized = 93 => "MEMPOOL_NOT_INITIALIZED",
    ShouldNotHaveIcc = 94 => "SHOULD_NOT_HAVE_ICC",
    ShouldHaveIcc = 95 => "SHOULD_HAVE_ICC",
    InvalidIccVdf = 96 => "INVALID_ICC_VDF",
    InvalidIccHashCc = 97 => "INVALID_ICC_HASH_CC",
    InvalidIccHashRc = 98 => "INVALID_ICC_HASH_RC",
    InvalidIccEosVdf = 99 => "INVALID_ICC_EOS_VDF",
    InvalidSpIndex = 100 => "INVALID_SP_INDEX",
    TooManyBlocks = 101 => "TOO_MANY_BLOCKS",
    InvalidCcChallenge = 102 => "INVALID_CC_CHALLENGE",
    InvalidPrefarm = 103 => "INVALID_PREFARM",
    AssertSecondsRelativeFailed = 105 => "ASSERT_SECONDS_RELATIVE_FAILED",
    InitialTransactionFreeze = 108 => "INITIAL_TRANSACTION_FREEZE",
    NoTransactionsWhileSyncing = 109 => "NO_TRANSACTIONS_WHILE_SYNCING",
    AlreadyIncludingTransaction = 110 => "ALREADY_INCLUDING_TRANSACTION",
    InvalidRequiredIters = 115 => "INVALID_REQUIRED_ITERS",
    TooManyGeneratorRefs = 116 => "TOO_MANY_GENERATOR_REFS",
    AssertMyParentIdFailed = 117 => "ASSERT_MY_PARENT_ID_FAILED",
    AssertMyPuzzlehashFailed = 118 => "ASSERT_MY_PUZZLEHASH_FAILED",
    AssertMyAmountFailed = 119 => "ASSERT_MY_AMOUNT_FAILED",
    GeneratorRuntimeError = 120 => "GENERATOR_RUNTIME_ERROR",
    InvalidTransactionsGeneratorRefsRoot = 122 => "INVALID_TRANSACTIONS_GENERATOR_REFS_ROOT",
    FutureGeneratorRefs = 123 => "FUTURE_GENERATOR_REFS",
    GeneratorRefHasNoGenerator = 124 => "GENERATOR_REF_HAS_NO_GENERATOR",
    DoubleSpendInFork = 125 => "DOUBLE_SPEND_IN_FORK",
    CoinAmountNegative = 127 => "COIN_AMOUNT_NEGATIVE",
    InternalProtocolError = 128 => "INTERNAL_PROTOCOL_ERROR",
    InvalidSpendBundle = 129 => "INVALID_SPEND_BUNDLE",
    AssertBeforeSecondsAbsoluteFailed = 132 => "ASSERT_BEFORE_SECONDS_ABSOLUTE_FAILED",
    AssertBeforeSecondsRelativeFailed = 133 => "ASSERT_BEFORE_SECONDS_RELATIVE_FAILED",
    AssertBeforeHeightAbsoluteFailed = 134 => "ASSERT_BEFORE_HEIGHT_ABSOLUTE_FAILED",
    AssertBeforeHeightRelativeFailed = 135 => "ASSERT_BEFORE_HEIGHT_RELATIVE_FAILED",
    AssertConcurrentSpendFailed = 136 => "ASSERT_CONCURRENT_SPEND_FAILED",
    InvalidNewSubSlotIters = 140 => "INVALID_NEW_SUB_SLOT_ITERS",
    InvalidNewDifficulty = 141 => "INVALID_NEW_DIFFICULTY",
    MempoolFull = 142 => "MEMPOOL_FULL",
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rejected block or spend bundle, with an optional note on which field failed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: Option<String>,
}
impl ValidationError {
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}
impl From<ErrorCode> for ValidationError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}
impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}
impl std::error::Error for ValidationError {}

/// Failure of an operation that both validates and persists.
#[derive(Debug)]
pub enum ConsensusError {
    Invalid(ValidationError),
    Storage(Error),
}
impl ConsensusError {
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ConsensusError::Invalid(e) => Some(e.code),
            ConsensusError::Storage(_) => None,
        }
    }
}
impl From<ValidationError> for ConsensusError {
    fn from(e: ValidationError) -> Self {
        ConsensusError::Invalid(e)
    }
}
impl From<ErrorCode> for ConsensusError {
    fn from(code: ErrorCode) -> Self {
        ConsensusError::Invalid(ValidationError::new(code))
    }
}
impl From<Error> for ConsensusError {
    fn from(e: Error) -> Self {
        ConsensusError::Storage(e)
    }
}
impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Invalid(e) => write!(f, "invalid: {e}"),
            ConsensusError::Storage(e) => write!(f, "storage failure: {e}"),
        }
    }
}
impl std::error::Error for ConsensusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsensusError::Invalid(e) => Some(e),
            ConsensusError::Storage(e) => Some(e),
        }
    }
}
