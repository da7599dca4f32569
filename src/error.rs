use snafu::Snafu;

/// The public Error type for this library.
#[derive(Debug, Snafu)]
pub struct Error(LibError);

/// The public Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// The internal Result type for this library.
pub(crate) type LibResult<T> = std::result::Result<T, LibError>;

/// The internal Error type for this library. Only user configuration
/// errors surface here: malformed byte streams are logged and consumed
/// by the parsers, and invariant violations panic.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub(crate) enum LibError {
    #[snafu(display("{}: mapping rejected: {}", site, reason))]
    BadMapping { site: String, reason: &'static str },

    #[snafu(display("{}: invalid sysex pattern: {}", site, reason))]
    BadPattern { site: String, reason: &'static str },

    #[snafu(display("controller {} is reserved", num))]
    ReservedController { num: u32 },

    #[snafu(display("no free sysex pattern slot"))]
    NoPatternSlot,

    #[snafu(display("name '{}' already in use", name))]
    DuplicateName { name: String },

    #[snafu(display("device unit {} out of range", unit))]
    BadUnit { unit: u8 },

    #[snafu(display("device unit {} already exists", unit))]
    UnitExists { unit: u8 },

    #[snafu(display("no device on unit {}", unit))]
    NoSuchUnit { unit: u8 },

    #[snafu(display("unit {} is the clock or MTC master, can't detach", unit))]
    MasterInUse { unit: u8 },
}

macro_rules! site {
    () => {
        format!("{}:{}", file!(), line!())
    };
}

#[test]
fn site_test() {
    let line = line!() + 1;
    let site = site!();
    assert!(site.contains("error.rs"));
    assert!(site.contains(format!("{}", line).as_str()));
}
