//! Recipient address to user resolution

use std::sync::LazyLock;

use regex::Regex;

/// User id for mail whose recipient does not follow the `user-<id>@` convention
pub const DEFAULT_USER_ID: &str = "default";

/// Local part must open the string or follow an address delimiter, so
/// `"Bob" <user-7@mail.local>` matches but `xuser-7@mail.local` does not.
static USER_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[\s<,":;])user-([A-Za-z0-9_]+)@[^\s@<>,;]+"#).expect("user address pattern")
});

/// Extract the user id embedded in a `user-<id>@<domain>` address.
///
/// Never fails: anything that does not follow the convention resolves to
/// [`DEFAULT_USER_ID`].
pub fn resolve_user_id(address: &str) -> String {
    directed_user_id(address).unwrap_or_else(|| DEFAULT_USER_ID.to_owned())
}

/// Like [`resolve_user_id`] but reports a miss as `None`
pub fn directed_user_id(address: &str) -> Option<String> {
    USER_ADDRESS
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_owned())
}

/// Address a user publishes to receive mail on this server
pub fn inbound_address(user_id: &str, domain: &str) -> String {
    format!("user-{user_id}@{domain}")
}
