/// Validator
///
/// CAIP-2/CAIP-10 compliance, namespace rules for proposals and
/// settlements, runtime method and event authorisation, and the smaller
/// request checks of the sign protocol. Every check reports the first rule
/// that fails; checks are never cumulative.
///
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::PeerError;
use crate::types::{
    NamespaceScope, ProposalNamespaces, SessionEventParams, SessionNamespace,
    SessionNamespaces, SessionProperties, SessionRequestParams,
};
use crate::utils::WEEKS;

pub const NAMESPACE_CHAINS_UNDEFINED_MISSING: &str =
    "Chains must be defined for namespace keys without a reference";
pub const NAMESPACE_CHAINS_MISSING: &str = "Chains must not be empty";
pub const NAMESPACE_CHAINS_CAIP_2: &str = "Chains must be CAIP-2 compliant";
pub const NAMESPACE_CHAINS_WRONG_NAMESPACE: &str =
    "Chains must be defined in matching namespace";
pub const NAMESPACE_ACCOUNTS_CAIP_10: &str = "Accounts must be CAIP-10 compliant";
pub const NAMESPACE_ACCOUNTS_WRONG_NAMESPACE: &str =
    "Accounts must be defined in matching namespace";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    EmptyNamespaces,
    UnsupportedNamespaceKey,
    UnsupportedChains(&'static str),
    UserRejectedChains(&'static str),
    UserRejected,
    UserRejectedMethods,
    UserRejectedEvents,
    UnauthorizedMethod,
    UnauthorizedEvent,
    InvalidSessionRequest,
    InvalidEvent,
    InvalidExtendRequest,
    InvalidSessionProperties,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyNamespaces => {
                write!(f, "Session namespaces must not be empty")
            }
            ValidationError::UnsupportedNamespaceKey => {
                write!(f, "Namespace keys must be CAIP-2 compliant")
            }
            ValidationError::UnsupportedChains(m)
            | ValidationError::UserRejectedChains(m) => write!(f, "{m}"),
            ValidationError::UserRejected => {
                write!(f, "Not every required namespace was approved")
            }
            ValidationError::UserRejectedMethods => {
                write!(f, "Not every required method was approved")
            }
            ValidationError::UserRejectedEvents => {
                write!(f, "Not every required event was approved")
            }
            ValidationError::UnauthorizedMethod => {
                write!(f, "Method is not authorized for this chain")
            }
            ValidationError::UnauthorizedEvent => {
                write!(f, "Event is not authorized for this chain")
            }
            ValidationError::InvalidSessionRequest => {
                write!(f, "Invalid session request")
            }
            ValidationError::InvalidEvent => write!(f, "Invalid event"),
            ValidationError::InvalidExtendRequest => {
                write!(f, "Invalid session extend request")
            }
            ValidationError::InvalidSessionProperties => {
                write!(f, "Session properties must not be empty")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// Error answered to the peer whose message failed the check.
    pub fn to_peer_error(&self) -> PeerError {
        let message = self.to_string();
        match self {
            ValidationError::EmptyNamespaces
            | ValidationError::UnsupportedNamespaceKey => {
                PeerError::UnsupportedNamespaceKey(message)
            }
            ValidationError::UnsupportedChains(_) => {
                PeerError::UnsupportedChains(message)
            }
            ValidationError::UserRejectedChains(_) => {
                PeerError::UserRejectedChains(message)
            }
            ValidationError::UserRejected => PeerError::UserRejected(message),
            ValidationError::UserRejectedMethods => {
                PeerError::UserRejectedMethods(message)
            }
            ValidationError::UserRejectedEvents => {
                PeerError::UserRejectedEvents(message)
            }
            ValidationError::UnauthorizedMethod => {
                PeerError::UnauthorizedMethod(message)
            }
            ValidationError::UnauthorizedEvent => {
                PeerError::UnauthorizedEvent(message)
            }
            ValidationError::InvalidSessionRequest => {
                PeerError::InvalidSessionRequest(message)
            }
            ValidationError::InvalidEvent => PeerError::InvalidEvent(message),
            ValidationError::InvalidExtendRequest => {
                PeerError::InvalidExtendRequest(message)
            }
            ValidationError::InvalidSessionProperties => {
                PeerError::InvalidSessionSettleRequest(message)
            }
        }
    }
}

type Check = Result<(), ValidationError>;

fn namespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-a-z0-9]{3,8}$").expect("namespace regex must compile")
    })
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-_a-zA-Z0-9]{1,32}$").expect("reference regex must compile")
    })
}

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[-.%a-zA-Z0-9]{1,128}$").expect("address regex must compile")
    })
}

/// Bare namespace key such as `eip155`.
pub fn is_namespace_compliant(key: &str) -> bool {
    namespace_regex().is_match(key)
}

/// `namespace:reference`, e.g. `eip155:1`.
pub fn is_chain_id_caip2_compliant(chain_id: &str) -> bool {
    match chain_id.split(':').collect::<Vec<_>>().as_slice() {
        [namespace, reference] => {
            namespace_regex().is_match(namespace)
                && reference_regex().is_match(reference)
        }
        _ => false,
    }
}

/// `namespace:reference:address`.
pub fn is_account_id_caip10_compliant(account_id: &str) -> bool {
    match account_id.split(':').collect::<Vec<_>>().as_slice() {
        [namespace, reference, address] => {
            namespace_regex().is_match(namespace)
                && reference_regex().is_match(reference)
                && address_regex().is_match(address)
        }
        _ => false,
    }
}

/// `eip155:1:0xab..` -> `eip155:1`. Anything that is not a CAIP-10 triple
/// is returned unchanged.
pub fn chain_from_account(account_id: &str) -> String {
    match account_id.split(':').collect::<Vec<_>>().as_slice() {
        [namespace, reference, _] => format!("{namespace}:{reference}"),
        _ => account_id.to_string(),
    }
}

pub fn namespace_from_chain_id(chain_id: &str) -> String {
    match chain_id.split(':').collect::<Vec<_>>().as_slice() {
        [namespace, _] => namespace.to_string(),
        _ => chain_id.to_string(),
    }
}

/// `item` sits under `key`: either equal to it or prefixed by `key:`.
fn in_namespace(item: &str, key: &str) -> bool {
    let item = item.to_ascii_lowercase();
    let key = key.to_ascii_lowercase();
    item == key || item.starts_with(&format!("{key}:"))
}

fn keys_properly_formatted<N>(namespaces: &HashMap<String, N>) -> bool {
    namespaces
        .keys()
        .all(|k| is_namespace_compliant(k) || is_chain_id_caip2_compliant(k))
}

fn chains_defined<N: NamespaceScope>(namespaces: &HashMap<String, N>) -> bool {
    namespaces
        .iter()
        .all(|(k, n)| !(is_namespace_compliant(k) && n.chains().is_none()))
}

fn chains_not_empty<N: NamespaceScope>(namespaces: &HashMap<String, N>) -> bool {
    namespaces.iter().all(|(k, n)| {
        !(is_namespace_compliant(k) && n.chains().is_some_and(|c| c.is_empty()))
    })
}

fn with_chains<N: NamespaceScope>(
    namespaces: &HashMap<String, N>,
) -> impl Iterator<Item = (&String, &[String])> {
    namespaces.iter().filter_map(|(k, n)| {
        n.chains().filter(|c| !c.is_empty()).map(|c| (k, c))
    })
}

fn chain_ids_valid<N: NamespaceScope>(namespaces: &HashMap<String, N>) -> bool {
    with_chains(namespaces)
        .flat_map(|(_, chains)| chains)
        .all(|c| is_chain_id_caip2_compliant(c))
}

fn chains_in_matching_namespace<N: NamespaceScope>(
    namespaces: &HashMap<String, N>,
) -> bool {
    with_chains(namespaces)
        .all(|(key, chains)| chains.iter().all(|c| in_namespace(c, key)))
}

fn account_ids_valid(namespaces: &SessionNamespaces) -> bool {
    namespaces
        .values()
        .flat_map(|n| &n.accounts)
        .all(|a| is_account_id_caip10_compliant(a))
}

fn accounts_in_matching_namespace_and_chains(
    namespaces: &SessionNamespaces,
) -> bool {
    namespaces.iter().all(|(key, n)| match &n.chains {
        Some(chains) if is_namespace_compliant(key) => n.accounts.iter().all(|a| {
            in_namespace(a, key) && chains.contains(&chain_from_account(a))
        }),
        _ => n.accounts.iter().all(|a| in_namespace(a, key)),
    })
}

/// Chains each method (or event) is granted on. Explicit `chains` win;
/// a `namespace:reference` key without chains grants its own chain; a bare
/// session key without chains infers them from its accounts.
fn with_chains_by<N, F>(
    namespaces: &HashMap<String, N>,
    items: F,
) -> HashMap<String, HashSet<String>>
where
    N: NamespaceScope,
    F: Fn(&N) -> &[String],
{
    let mut granted: HashMap<String, HashSet<String>> = HashMap::new();
    for (key, namespace) in namespaces {
        let chains: Vec<String> = match namespace.chains() {
            Some(chains) => chains.to_vec(),
            None if is_chain_id_caip2_compliant(key) => vec![key.clone()],
            None => namespace
                .accounts()
                .unwrap_or_default()
                .iter()
                .map(|a| chain_from_account(a))
                .collect(),
        };
        for item in items(namespace) {
            granted
                .entry(item.clone())
                .or_default()
                .extend(chains.iter().cloned());
        }
    }
    granted
}

pub fn all_methods_with_chains<N: NamespaceScope>(
    namespaces: &HashMap<String, N>,
) -> HashMap<String, HashSet<String>> {
    with_chains_by(namespaces, N::methods)
}

pub fn all_events_with_chains<N: NamespaceScope>(
    namespaces: &HashMap<String, N>,
) -> HashMap<String, HashSet<String>> {
    with_chains_by(namespaces, N::events)
}

fn all_approved(
    approved: &HashMap<String, HashSet<String>>,
    required: &HashMap<String, HashSet<String>>,
) -> bool {
    required.iter().all(|(item, chains)| {
        approved
            .get(item)
            .is_some_and(|granted| granted.is_superset(chains))
    })
}

fn ensure(condition: bool, error: ValidationError) -> Check {
    if condition { Ok(()) } else { Err(error) }
}

pub fn validate_proposal_namespaces(namespaces: &ProposalNamespaces) -> Check {
    use ValidationError::*;
    ensure(keys_properly_formatted(namespaces), UnsupportedNamespaceKey)?;
    ensure(
        chains_defined(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_UNDEFINED_MISSING),
    )?;
    ensure(
        chains_not_empty(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_MISSING),
    )?;
    ensure(
        chain_ids_valid(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_CAIP_2),
    )?;
    ensure(
        chains_in_matching_namespace(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_WRONG_NAMESPACE),
    )
}

pub fn validate_session_namespace(
    namespaces: &SessionNamespaces,
    required: &ProposalNamespaces,
) -> Check {
    use ValidationError::*;
    ensure(!namespaces.is_empty(), EmptyNamespaces)?;
    ensure(keys_properly_formatted(namespaces), UnsupportedNamespaceKey)?;
    ensure(
        chains_not_empty(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_MISSING),
    )?;
    ensure(
        chain_ids_valid(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_CAIP_2),
    )?;
    ensure(
        chains_in_matching_namespace(namespaces),
        UnsupportedChains(NAMESPACE_CHAINS_WRONG_NAMESPACE),
    )?;
    ensure(
        account_ids_valid(namespaces),
        UserRejectedChains(NAMESPACE_ACCOUNTS_CAIP_10),
    )?;
    ensure(
        accounts_in_matching_namespace_and_chains(namespaces),
        UserRejectedChains(NAMESPACE_ACCOUNTS_WRONG_NAMESPACE),
    )?;
    ensure(
        required.keys().all(|k| namespaces.contains_key(k)),
        UserRejected,
    )?;
    ensure(
        all_approved(
            &all_methods_with_chains(namespaces),
            &all_methods_with_chains(required),
        ),
        UserRejectedMethods,
    )?;
    ensure(
        all_approved(
            &all_events_with_chains(namespaces),
            &all_events_with_chains(required),
        ),
        UserRejectedEvents,
    )
}

/// Session check plus: accounts under each bare required key must cover
/// every chain that key asked for.
pub fn validate_supported_namespace(
    namespaces: &SessionNamespaces,
    required: &ProposalNamespaces,
) -> Check {
    validate_session_namespace(namespaces, required)?;
    let all_chains_approved = required
        .iter()
        .filter(|(key, _)| !is_chain_id_caip2_compliant(key))
        .filter_map(|(key, n)| n.chains.as_ref().map(|c| (key, c)))
        .all(|(key, chains)| {
            namespaces.get(key).is_some_and(|n: &SessionNamespace| {
                let approved: HashSet<String> =
                    n.accounts.iter().map(|a| chain_from_account(a)).collect();
                chains.iter().all(|c| approved.contains(c))
            })
        });
    ensure(
        all_chains_approved,
        ValidationError::UserRejectedChains(NAMESPACE_ACCOUNTS_WRONG_NAMESPACE),
    )
}

pub fn validate_properties(properties: &SessionProperties) -> Check {
    ensure(!properties.is_empty(), ValidationError::InvalidSessionProperties)
}

pub fn validate_chain_id_with_method_authorisation(
    chain_id: &str,
    method: &str,
    namespaces: &SessionNamespaces,
) -> Check {
    let granted = all_methods_with_chains(namespaces);
    ensure(
        granted.get(method).is_some_and(|c| c.contains(chain_id)),
        ValidationError::UnauthorizedMethod,
    )
}

pub fn validate_chain_id_with_event_authorisation(
    chain_id: &str,
    event: &str,
    namespaces: &SessionNamespaces,
) -> Check {
    let granted = all_events_with_chains(namespaces);
    ensure(
        granted.get(event).is_some_and(|c| c.contains(chain_id)),
        ValidationError::UnauthorizedEvent,
    )
}

pub fn validate_session_request(topic: &str, request: &SessionRequestParams) -> Check {
    let params_empty = match &request.request.params {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    };
    ensure(
        !params_empty
            && !request.request.method.is_empty()
            && !topic.is_empty()
            && is_chain_id_caip2_compliant(&request.chain_id),
        ValidationError::InvalidSessionRequest,
    )
}

pub fn validate_event(event: &SessionEventParams) -> Check {
    ensure(
        !event.event.data.is_null()
            && !event.event.name.is_empty()
            && is_chain_id_caip2_compliant(&event.chain_id),
        ValidationError::InvalidEvent,
    )
}

/// New expiry must be later than the current one, by at most a week.
pub fn validate_session_extend(new_expiry: u64, current_expiry: u64) -> Check {
    ensure(
        new_expiry > current_expiry && new_expiry - current_expiry <= WEEKS,
        ValidationError::InvalidExtendRequest,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProposalNamespace, SessionEvent, SessionRequest};
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn proposal(
        key: &str,
        chains: Option<&[&str]>,
        methods: &[&str],
        events: &[&str],
    ) -> ProposalNamespaces {
        HashMap::from([(
            key.to_string(),
            ProposalNamespace {
                chains: chains.map(strings),
                methods: strings(methods),
                events: strings(events),
            },
        )])
    }

    fn session(
        key: &str,
        chains: Option<&[&str]>,
        accounts: &[&str],
        methods: &[&str],
        events: &[&str],
    ) -> SessionNamespaces {
        HashMap::from([(
            key.to_string(),
            SessionNamespace {
                chains: chains.map(strings),
                accounts: strings(accounts),
                methods: strings(methods),
                events: strings(events),
            },
        )])
    }

    const ACCOUNT_1: &str = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";
    const ACCOUNT_137: &str = "eip155:137:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";

    #[test]
    fn test_caip_compliance() {
        assert!(is_chain_id_caip2_compliant("eip155:1"));
        assert!(is_chain_id_caip2_compliant("cosmos:cosmoshub-4"));
        assert!(!is_chain_id_caip2_compliant("eip155"));
        assert!(!is_chain_id_caip2_compliant("EIP155:1"));
        assert!(!is_chain_id_caip2_compliant("eip155:1:2"));
        assert!(is_account_id_caip10_compliant(ACCOUNT_1));
        assert!(!is_account_id_caip10_compliant("eip155:1"));
        assert_eq!(chain_from_account(ACCOUNT_137), "eip155:137");
        assert_eq!(namespace_from_chain_id("eip155:137"), "eip155");
    }

    #[test]
    fn test_undefined_chains_reported_first() {
        // also has a bad chain id, which must not be what is reported
        let mut namespaces = proposal("eip155", None, &["eth_sign"], &[]);
        namespaces.extend(proposal("cosmos", Some(&["cosmos"]), &[], &[]));
        assert_eq!(
            validate_proposal_namespaces(&namespaces),
            Err(ValidationError::UnsupportedChains(
                NAMESPACE_CHAINS_UNDEFINED_MISSING
            ))
        );
    }

    #[test]
    fn test_proposal_rule_order() {
        assert_eq!(
            validate_proposal_namespaces(&proposal("Eip155", None, &[], &[])),
            Err(ValidationError::UnsupportedNamespaceKey)
        );
        assert_eq!(
            validate_proposal_namespaces(&proposal("eip155", Some(&[]), &[], &[])),
            Err(ValidationError::UnsupportedChains(NAMESPACE_CHAINS_MISSING))
        );
        assert_eq!(
            validate_proposal_namespaces(&proposal("eip155", Some(&["1"]), &[], &[])),
            Err(ValidationError::UnsupportedChains(NAMESPACE_CHAINS_CAIP_2))
        );
        assert_eq!(
            validate_proposal_namespaces(&proposal(
                "eip155",
                Some(&["cosmos:cosmoshub-4"]),
                &[],
                &[]
            )),
            Err(ValidationError::UnsupportedChains(
                NAMESPACE_CHAINS_WRONG_NAMESPACE
            ))
        );
        assert_eq!(
            validate_proposal_namespaces(&proposal("eip155:1", None, &["eth_sign"], &[])),
            Ok(())
        );
    }

    #[test]
    fn test_superset_session_passes() {
        let required = proposal(
            "eip155",
            Some(&["eip155:1"]),
            &["eth_sign"],
            &["chainChanged"],
        );
        let approved = session(
            "eip155",
            Some(&["eip155:1", "eip155:137"]),
            &[ACCOUNT_1, ACCOUNT_137],
            &["eth_sign", "personal_sign"],
            &["chainChanged", "accountsChanged"],
        );
        assert_eq!(validate_session_namespace(&approved, &required), Ok(()));
        assert_eq!(validate_supported_namespace(&approved, &required), Ok(()));
    }

    #[test]
    fn test_removing_required_method_is_rejected() {
        let required = proposal(
            "eip155",
            Some(&["eip155:1"]),
            &["eth_sign", "personal_sign"],
            &["chainChanged"],
        );
        let approved = session(
            "eip155",
            Some(&["eip155:1"]),
            &[ACCOUNT_1],
            &["eth_sign"],
            &["chainChanged"],
        );
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejectedMethods)
        );
    }

    #[test]
    fn test_missing_event_and_key() {
        let required = proposal("eip155", Some(&["eip155:1"]), &[], &["chainChanged"]);
        let approved = session("eip155", Some(&["eip155:1"]), &[ACCOUNT_1], &[], &[]);
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejectedEvents)
        );

        let required = proposal("solana", Some(&["solana:mainnet"]), &[], &[]);
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejected)
        );
        assert_eq!(
            validate_session_namespace(&HashMap::new(), &required),
            Err(ValidationError::EmptyNamespaces)
        );
    }

    #[test]
    fn test_accounts_rules() {
        let required = proposal("eip155", Some(&["eip155:1"]), &[], &[]);
        let approved = session("eip155", Some(&["eip155:1"]), &["eip155:1"], &[], &[]);
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejectedChains(NAMESPACE_ACCOUNTS_CAIP_10))
        );
        let approved = session("eip155", Some(&["eip155:1"]), &[ACCOUNT_137], &[], &[]);
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejectedChains(
                NAMESPACE_ACCOUNTS_WRONG_NAMESPACE
            ))
        );
    }

    #[test]
    fn test_legacy_account_derived_chains() {
        let required = proposal("eip155", Some(&["eip155:137"]), &["eth_sign"], &[]);
        let approved = session("eip155", None, &[ACCOUNT_137], &["eth_sign"], &[]);
        assert_eq!(validate_session_namespace(&approved, &required), Ok(()));

        // accounts only cover eip155:1, so eip155:137 is not granted
        let approved = session("eip155", None, &[ACCOUNT_1], &["eth_sign"], &[]);
        assert_eq!(
            validate_session_namespace(&approved, &required),
            Err(ValidationError::UserRejectedMethods)
        );
        assert_eq!(
            validate_supported_namespace(&approved, &required),
            Err(ValidationError::UserRejectedMethods)
        );
    }

    #[test]
    fn test_method_authorisation() {
        let approved = session("eip155:1", None, &[ACCOUNT_1], &["eth_sign"], &["chainChanged"]);
        assert_eq!(
            validate_chain_id_with_method_authorisation("eip155:1", "eth_sign", &approved),
            Ok(())
        );
        assert_eq!(
            validate_chain_id_with_method_authorisation("eip155:137", "eth_sign", &approved),
            Err(ValidationError::UnauthorizedMethod)
        );
        assert_eq!(
            validate_chain_id_with_method_authorisation("eip155:1", "personal_sign", &approved),
            Err(ValidationError::UnauthorizedMethod)
        );
        assert_eq!(
            validate_chain_id_with_event_authorisation("eip155:1", "chainChanged", &approved),
            Ok(())
        );
        assert_eq!(
            validate_chain_id_with_event_authorisation("eip155:1", "accountsChanged", &approved),
            Err(ValidationError::UnauthorizedEvent)
        );
    }

    #[test]
    fn test_extend_window() {
        assert!(validate_session_extend(1_000 + WEEKS, 1_000).is_ok());
        assert!(validate_session_extend(1_001 + WEEKS, 1_000).is_err());
        assert!(validate_session_extend(1_000, 1_000).is_err());
        assert!(validate_session_extend(999, 1_000).is_err());
    }

    #[test]
    fn test_request_and_event_checks() {
        let request = SessionRequestParams {
            request: SessionRequest {
                method: "eth_sign".to_string(),
                params: json!(["0xab16", "0xdeadbeef"]),
                expiry_timestamp: None,
            },
            chain_id: "eip155:1".to_string(),
        };
        assert!(validate_session_request("topic", &request).is_ok());
        assert!(validate_session_request("", &request).is_err());

        let mut bad = request.clone();
        bad.chain_id = "eip155".to_string();
        assert_eq!(
            validate_session_request("topic", &bad),
            Err(ValidationError::InvalidSessionRequest)
        );

        let event = SessionEventParams {
            event: SessionEvent {
                name: "chainChanged".to_string(),
                data: json!("0x1"),
            },
            chain_id: "eip155:1".to_string(),
        };
        assert!(validate_event(&event).is_ok());
        let mut bad = event.clone();
        bad.event.name.clear();
        assert_eq!(validate_event(&bad), Err(ValidationError::InvalidEvent));
    }

    #[test]
    fn test_peer_error_codes() {
        assert_eq!(ValidationError::UnauthorizedMethod.to_peer_error().code(), 3001);
        assert_eq!(ValidationError::UserRejectedMethods.to_peer_error().code(), 5002);
        assert_eq!(
            ValidationError::UnsupportedChains(NAMESPACE_CHAINS_MISSING)
                .to_peer_error()
                .code(),
            5100
        );
        assert!(validate_properties(&SessionProperties::new()).is_err());
    }
}
