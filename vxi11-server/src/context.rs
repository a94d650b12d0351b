use std::fmt::Display;

/// Internal error recorded by the core.
///
/// None of these reach the wire: rejected calls get no reply and overflows are
/// still acknowledged as successful. The last one is kept in [`RuntimeContext`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    None = 0,
    /// Malformed record or unsupported call
    BadCall = 1,
    /// SCPI input or output buffer capacity exceeded
    Overflow = 2,
    /// device_write or device_read before create_link
    LinkNotCreated = 3,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::None => write!(f, "none"),
            ErrorCode::BadCall => write!(f, "bad call"),
            ErrorCode::Overflow => write!(f, "overflow"),
            ErrorCode::LinkNotCreated => write!(f, "link not created"),
        }
    }
}

/// Snapshot of the state of a core, for diagnostics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeContext {
    pub link_created: bool,
    pub link_id: u32,
    /// Bytes held by the reassembly buffer
    pub rx_bytes: usize,
    pub scpi_in_bytes: usize,
    pub scpi_out_bytes: usize,
    pub last_error: ErrorCode,
}

#[test]
fn error_codes() {
    assert_eq!(ErrorCode::default(), ErrorCode::None);
    assert_eq!(ErrorCode::BadCall.code(), 1);
    assert_eq!(ErrorCode::Overflow.code(), 2);
    assert_eq!(ErrorCode::LinkNotCreated.code(), 3);
}
