//! Control Subject Patterns
//!
//! ```text
//! {chain}.control.save_abi                # Decoded ABI updates for the schema store
//! {chain}.control.ds_error                # Decode failures for offline analysis
//! {chain}.control.connect_ws              # Enables live streaming at runtime
//! ```

/// Control subject for a named event
///
/// Example: `eos.control.save_abi`
pub fn control_subject(chain: &str, event: &str) -> String {
    format!("{}.control.{}", chain, event)
}

/// Pattern for every control event of a chain
pub fn pattern_control_all(chain: &str) -> String {
    format!("{}.control.>", chain)
}

/// Extracts the event name from a control subject of the given chain.
///
/// Returns `None` for subjects outside `{chain}.control.*` or with extra tokens.
pub fn parse_control_event<'a>(chain: &str, subject: &'a str) -> Option<&'a str> {
    let rest = subject.strip_prefix(chain)?.strip_prefix(".control.")?;
    if rest.is_empty() || rest.contains('.') {
        None
    } else {
        Some(rest)
    }
}
