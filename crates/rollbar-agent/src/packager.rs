//! Assembles the occurrence envelope from a submission.
//!
//! No runtime type inspection: the caller already chose an explicit body
//! variant, and this module stamps the ambient fields (timestamps, host
//! metadata, the notifier stanza, a fresh UUID) and applies the configured
//! person and IP collection policies.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rollbar_api::item::{Notifier, Person, Request};
use rollbar_api::{Body, Data, Level};
use uuid::Uuid;

use crate::config::{Config, IpAddressPolicy, PersonDataPolicy};
use crate::notifier::ReportOptions;
use crate::{NOTIFIER_NAME, NOTIFIER_VERSION};

/// Builds the wire envelope for one submission.
pub(crate) fn assemble(
    config: &Config,
    level: Level,
    body: Body,
    options: ReportOptions,
) -> Data {
    let mut data = Data::new(config.environment.clone(), body, level);
    data.timestamp = epoch_seconds();
    data.platform = std::env::consts::OS.to_string();
    data.language = "rust".to_string();
    data.notifier = Notifier {
        name: NOTIFIER_NAME.to_string(),
        version: NOTIFIER_VERSION.to_string(),
    };
    data.server = config.server.clone();
    data.person = options
        .person
        .or_else(|| config.person.clone())
        .map(|person| apply_person_policy(person, config.person_data_policy));
    data.request = options
        .request
        .map(|request| apply_ip_policy(request, config.ip_address_policy));
    data.custom = options.custom;
    data.fingerprint = options.fingerprint;
    data.title = options.title;
    data.context = options.context;
    data.uuid = Some(Uuid::new_v4().simple().to_string());
    data
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn apply_person_policy(mut person: Person, policy: PersonDataPolicy) -> Person {
    if !policy.collect_username {
        person.username = None;
    }
    if !policy.collect_email {
        person.email = None;
    }
    person
}

fn apply_ip_policy(mut request: Request, policy: IpAddressPolicy) -> Request {
    match policy {
        IpAddressPolicy::Collect => {}
        IpAddressPolicy::DoNotCollect => request.user_ip = None,
        IpAddressPolicy::Anonymize => {
            request.user_ip = request.user_ip.as_deref().and_then(anonymize_ip);
        }
    }
    request
}

/// Zeroes the host portion of an address: the last IPv4 octet, the low 64
/// IPv6 bits. Unparseable addresses are dropped rather than shipped.
fn anonymize_ip(raw: &str) -> Option<String> {
    match raw.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            Some(format!("{a}.{b}.{c}.0"))
        }
        IpAddr::V6(v6) => {
            let masked = u128::from(v6) & !u128::from(u64::MAX);
            Some(std::net::Ipv6Addr::from(masked).to_string())
        }
    }
}
