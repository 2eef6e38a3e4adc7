//! LDAP escaping, domain path conversion and filter construction.

use std::fmt::Write;

use addir_core::AttributeNames;

use crate::principal::PrincipalSearchType;

/// Characters hex-escaped by [`escape`].
const ESCAPED_CHARS: &[char] = &[',', '\\', '#', '+', '<', '>', ';', '"', '='];

/// Characters that additionally carry meaning inside a search filter.
const FILTER_CHARS: &[char] = &['*', '(', ')', '\0'];

/// Substring of `objectCategory` identifying user entries.
pub const PERSON_CATEGORY_MARKER: &str = "CN=Person,";

/// Substring of `objectCategory` identifying group managed service accounts.
pub const GMSA_CATEGORY_MARKER: &str = "CN=ms-DS-Group-Managed-Service-Account,";

/// Class names marking user entries when the category attribute holds plain class names.
const PERSON_CLASSES: &[&str] = &["person", "user", "inetOrgPerson"];

/// Class name of group managed service accounts.
const GMSA_CLASS: &str = "msDS-GroupManagedServiceAccount";

/// Escapes `, \ # + < > ; " =` as a backslash followed by two uppercase hex digits.
///
/// Each escaped character is encoded from its single byte value, which is only meaningful for
/// ASCII input. Every character in the escaped set is ASCII, so other characters pass through
/// untouched.
#[must_use]
pub fn escape(value: &str) -> String {
    escape_chars(value, |ch| ESCAPED_CHARS.contains(&ch))
}

/// Escapes a value for use on the right-hand side of a filter assertion.
///
/// Applies [`escape`] and also hex-escapes `*`, `(`, `)` and NUL so user input can never alter
/// the shape of the filter.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    escape_chars(value, |ch| {
        ESCAPED_CHARS.contains(&ch) || FILTER_CHARS.contains(&ch)
    })
}

fn escape_chars(value: &str, needs_escape: impl Fn(char) -> bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if needs_escape(ch) {
            // Only ASCII characters are ever selected, so the cast is lossless.
            let _ = write!(escaped, "\\{:02X}", ch as u32 as u8);
        } else {
            escaped.push(ch);
        }
    }
    escaped
}

/// Reverses [`escape`].
///
/// `\XX` (two hex digits) decodes to the character with that byte value. A backslash followed by
/// anything else yields that character literally, and a trailing lone backslash is kept.
#[must_use]
pub fn unescape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut result = String::with_capacity(value.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch != '\\' {
            result.push(ch);
            i += 1;
            continue;
        }

        match (chars.get(i + 1), chars.get(i + 2)) {
            (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                let byte = (hex_value(*hi) << 4) | hex_value(*lo);
                result.push(char::from(byte));
                i += 3;
            }
            (Some(next), _) => {
                result.push(*next);
                i += 2;
            }
            (None, _) => {
                result.push('\\');
                i += 1;
            }
        }
    }

    result
}

fn hex_value(digit: char) -> u8 {
    digit.to_digit(16).map_or(0, |d| d as u8)
}

/// Extracts the dotted domain name from a distinguished name.
///
/// Every comma-separated component starting with `DC=` (any case) contributes its value, in
/// order: `CN=Admins,OU=Groups,DC=kramerica,DC=local` gives `kramerica.local`.
#[must_use]
pub fn domain_path(distinguished_name: &str) -> String {
    distinguished_name
        .split(',')
        .map(str::trim)
        .filter(|component| {
            component
                .get(..3)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("DC="))
        })
        .map(|component| &component[3..])
        .collect::<Vec<_>>()
        .join(".")
}

/// Converts a dotted domain name into its directory root: `a.b` gives `DC=a,DC=b`.
#[must_use]
pub fn search_path(domain: &str) -> String {
    domain
        .split('.')
        .filter(|label| !label.is_empty())
        .map(|label| format!("DC={label}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns true if a category value names the user (person) class.
///
/// Accepts both the `objectCategory` DN form and plain class names such as `person`, for
/// schemas that map the category onto `objectClass`.
#[must_use]
pub fn is_person_category(category: &str) -> bool {
    contains_ignore_case(category, PERSON_CATEGORY_MARKER)
        || PERSON_CLASSES
            .iter()
            .any(|class| category.eq_ignore_ascii_case(class))
}

/// Returns true if a category value names the group managed service account class.
#[must_use]
pub fn is_gmsa_category(category: &str) -> bool {
    contains_ignore_case(category, GMSA_CATEGORY_MARKER) || category.eq_ignore_ascii_case(GMSA_CLASS)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Filter for an exact user lookup.
///
/// Group managed service accounts carry a `$`-suffixed account name, so including them ORs in a
/// match on `<name>$` restricted to their category.
#[must_use]
pub fn user_lookup_filter(attributes: &AttributeNames, name: &str, include_gmsa: bool) -> String {
    let escaped = escape_filter_value(name);
    let plain = format!("({}={escaped})", attributes.account_name);
    if include_gmsa {
        format!(
            "(|{plain}(&({}={GMSA_CLASS})({}={escaped}$)))",
            attributes.object_category, attributes.account_name
        )
    } else {
        plain
    }
}

/// Filter for an exact group lookup by account name or relative name.
#[must_use]
pub fn group_lookup_filter(attributes: &AttributeNames, name: &str) -> String {
    let escaped = escape_filter_value(name);
    format!(
        "(|({}={escaped})({}={escaped}))",
        attributes.account_name, attributes.name
    )
}

/// Category clause restricting a search to the requested principal kinds.
#[must_use]
pub fn category_filter(
    attributes: &AttributeNames,
    search_type: PrincipalSearchType,
    include_gmsa: bool,
) -> String {
    let category = &attributes.object_category;
    let mut users = format!("({category}=user)");
    if include_gmsa {
        let _ = write!(users, "({category}={GMSA_CLASS})");
    }
    let groups = format!("({category}=group)");
    match search_type {
        PrincipalSearchType::Users if include_gmsa => format!("(|{users})"),
        PrincipalSearchType::Users => users,
        PrincipalSearchType::Groups => groups,
        PrincipalSearchType::UsersAndGroups => format!("(|{users}{groups})"),
    }
}

/// Filter for a free-text prefix search.
#[must_use]
pub fn free_text_filter(
    attributes: &AttributeNames,
    term: &str,
    search_type: PrincipalSearchType,
    include_gmsa: bool,
) -> String {
    let escaped = escape_filter_value(term);
    let names = [
        &attributes.principal_name,
        &attributes.account_name,
        &attributes.name,
        &attributes.display_name,
    ]
    .iter()
    .map(|attribute| format!("({attribute}={escaped}*)"))
    .collect::<String>();

    format!(
        "(&{}(|{names}))",
        category_filter(attributes, search_type, include_gmsa)
    )
}

/// Filter matching the entries that list `group_dn` in their membership attribute.
#[must_use]
pub fn member_of_filter(attributes: &AttributeNames, group_dn: &str) -> String {
    format!("({}={})", attributes.member_of, escape_filter_value(group_dn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_uses_uppercase_hex() {
        assert_eq!(escape("Smith, John"), "Smith\\2C John");
        assert_eq!(escape("a=b+c"), "a\\3Db\\2Bc");
        assert_eq!(escape("back\\slash"), "back\\5Cslash");
        assert_eq!(escape("#<>;\""), "\\23\\3C\\3E\\3B\\22");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn unescape_reverses_escape() {
        let all = ",\\#+<>;\"=";
        assert_eq!(unescape(&escape(all)), all);
        for ch in all.chars() {
            let value = format!("x{ch}{ch}y");
            assert_eq!(unescape(&escape(&value)), value);
        }
    }

    #[test]
    fn unescape_single_character_escapes() {
        assert_eq!(unescape("Smith\\, John"), "Smith, John");
        assert_eq!(unescape("a\\zb"), "azb");
        assert_eq!(unescape("trailing\\"), "trailing\\");
        assert_eq!(unescape("\\4"), "4");
    }

    #[test]
    fn non_ascii_escapes_decode_per_byte() {
        // Known limitation: hex escapes decode one byte to one character, so multi-byte
        // UTF-8 sequences do not round-trip.
        assert_eq!(escape("é"), "é");
        assert_eq!(unescape("\\C3\\A9"), "\u{c3}\u{a9}");
        assert_ne!(unescape("\\C3\\A9"), "é");
    }

    #[test]
    fn filter_values_cannot_change_filter_shape() {
        assert_eq!(escape_filter_value("*)(uid=*"), "\\2A\\29\\28uid\\3D\\2A");
        assert_eq!(escape_filter_value("nul\0"), "nul\\00");
    }

    #[test]
    fn domain_path_collects_dc_components() {
        assert_eq!(
            domain_path("CN=Admins,OU=Groups,DC=kramerica,DC=local"),
            "kramerica.local"
        );
        assert_eq!(domain_path("cn=x,dc=Us, dc=Kramerica,dc=local"), "Us.Kramerica.local");
        assert_eq!(domain_path("CN=NoDomain,OU=x"), "");
        assert_eq!(domain_path(""), "");
    }

    #[test]
    fn search_path_maps_labels() {
        assert_eq!(search_path("a.b"), "DC=a,DC=b");
        assert_eq!(search_path("kramerica.local"), "DC=kramerica,DC=local");
        assert_eq!(search_path("single"), "DC=single");
        assert_eq!(domain_path(&search_path("us.kramerica.local")), "us.kramerica.local");
    }

    #[test]
    fn category_markers() {
        assert!(is_person_category(
            "CN=Person,CN=Schema,CN=Configuration,DC=kramerica,DC=local"
        ));
        assert!(!is_person_category(
            "CN=Group,CN=Schema,CN=Configuration,DC=kramerica,DC=local"
        ));
        assert!(is_gmsa_category(
            "CN=ms-DS-Group-Managed-Service-Account,CN=Schema,CN=Configuration,DC=k,DC=l"
        ));
    }

    #[test]
    fn lookup_filters() {
        let attributes = AttributeNames::default();
        assert_eq!(
            user_lookup_filter(&attributes, "jsmith", false),
            "(sAMAccountName=jsmith)"
        );
        assert_eq!(
            user_lookup_filter(&attributes, "svc", true),
            "(|(sAMAccountName=svc)(&(objectCategory=msDS-GroupManagedServiceAccount)(sAMAccountName=svc$)))"
        );
        assert_eq!(
            group_lookup_filter(&attributes, "Domain Admins"),
            "(|(sAMAccountName=Domain Admins)(name=Domain Admins))"
        );
    }

    #[test]
    fn free_text_filter_shape() {
        let attributes = AttributeNames::default();
        assert_eq!(
            free_text_filter(&attributes, "js", PrincipalSearchType::Users, false),
            "(&(objectCategory=user)(|(userPrincipalName=js*)(sAMAccountName=js*)(name=js*)(displayName=js*)))"
        );
        assert_eq!(
            category_filter(&attributes, PrincipalSearchType::UsersAndGroups, false),
            "(|(objectCategory=user)(objectCategory=group))"
        );
        assert_eq!(
            category_filter(&attributes, PrincipalSearchType::Users, true),
            "(|(objectCategory=user)(objectCategory=msDS-GroupManagedServiceAccount))"
        );
        assert_eq!(
            category_filter(&attributes, PrincipalSearchType::Groups, true),
            "(objectCategory=group)"
        );
    }

    #[test]
    fn filters_follow_remapped_category_attribute() {
        let attributes = AttributeNames {
            object_category: "objectClass".to_string(),
            ..AttributeNames::default()
        };

        let free_text = free_text_filter(&attributes, "js", PrincipalSearchType::Users, true);
        assert_eq!(
            free_text,
            "(&(|(objectClass=user)(objectClass=msDS-GroupManagedServiceAccount))(|(userPrincipalName=js*)(sAMAccountName=js*)(name=js*)(displayName=js*)))"
        );
        assert!(!free_text.contains("objectCategory"));

        let lookup = user_lookup_filter(&attributes, "svc", true);
        assert_eq!(
            lookup,
            "(|(sAMAccountName=svc)(&(objectClass=msDS-GroupManagedServiceAccount)(sAMAccountName=svc$)))"
        );
        assert_eq!(
            category_filter(&attributes, PrincipalSearchType::UsersAndGroups, false),
            "(|(objectClass=user)(objectClass=group))"
        );
    }

    #[test]
    fn category_class_names() {
        assert!(is_person_category("person"));
        assert!(is_person_category("User"));
        assert!(is_person_category("inetOrgPerson"));
        assert!(!is_person_category("group"));
        assert!(!is_person_category("top"));
        assert!(is_gmsa_category("msDS-GroupManagedServiceAccount"));
        assert!(!is_gmsa_category("user"));
    }

    #[test]
    fn member_of_filter_escapes_dn() {
        let attributes = AttributeNames::default();
        assert_eq!(
            member_of_filter(&attributes, "CN=A,DC=k"),
            "(memberOf=CN\\3DA\\2CDC\\3Dk)"
        );
    }
}
