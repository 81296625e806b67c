use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid range: {start:#018x}..{end:#018x}")]
    InvalidRange { start: u64, end: u64 },
    #[error("range overflow when adding {offset:#x} to {start:#x}..{end:#x}")]
    Overflow { start: u64, end: u64, offset: u64 },
    #[error("range underflow when subtracting {offset:#x} from {start:#x}..{end:#x}")]
    Underflow { start: u64, end: u64, offset: u64 },
    #[error("cannot parse `{0}` as a range (expected `0xSTART..0xEND`)")]
    Parse(String),
}
