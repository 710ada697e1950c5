//! Protocol version negotiation.
//!
//! Exactly once per connection attempt, the client fetches the server's
//! advertisement list, intersects it with its own fixed support list by
//! exact protocol id, picks the greatest mutually implemented
//! `(major, minor)` pair, and hands the advertised endpoint path to the
//! matching transport factory.

use std::time::Duration;

use kestrel_protocol::compress::gzip_decode;
use kestrel_protocol::discovery::decode_advertisements;
use kestrel_protocol::types::{
    client_supported_protocols, EndpointAdvertisement, ProtocolIdentifier, PROTOCOL_KESTREL_ID,
};

use crate::error::ClientError;
use crate::transport::{http_get, ServerAddress, Transport};

/// Creates transports for the protocols it understands.
pub trait TransportFactory: Send + Sync {
    fn supports(&self, protocol: &ProtocolIdentifier) -> bool;
    fn create(&self, address: &ServerAddress, advert: &EndpointAdvertisement) -> Transport;
}

/// Factory for major version 1 of the Kestrel protocol.
pub struct TransportFactoryV1;

impl TransportFactory for TransportFactoryV1 {
    fn supports(&self, protocol: &ProtocolIdentifier) -> bool {
        protocol.id == PROTOCOL_KESTREL_ID && protocol.version_major == 1
    }

    fn create(&self, address: &ServerAddress, advert: &EndpointAdvertisement) -> Transport {
        Transport::new(address.clone(), advert.protocol, &advert.endpoint_path)
    }
}

/// The default factory set.
pub fn default_factories() -> Vec<Box<dyn TransportFactory>> {
    vec![Box::new(TransportFactoryV1)]
}

/// Pick the best advertisement: exact id match against the support
/// list, then the greatest `(major, minor)` pair both sides implement.
/// Deterministic for any fixed pair of inputs.
pub fn best_advertisement<'a>(
    supported: &[ProtocolIdentifier],
    advertised: &'a [EndpointAdvertisement],
) -> Result<&'a EndpointAdvertisement, ClientError> {
    advertised
        .iter()
        .filter(|advert| {
            supported.iter().any(|s| {
                s.id == advert.protocol.id
                    && s.version_pair() == advert.protocol.version_pair()
            })
        })
        .max_by_key(|advert| advert.protocol.version_pair())
        .ok_or_else(|| ClientError::NoSupportedProtocols {
            offered: advertised.iter().map(|a| a.protocol.to_string()).collect(),
        })
}

/// Negotiate against a server and return a transport bound to the
/// resolved endpoint. Not retried on failure.
pub async fn negotiate(
    address: &ServerAddress,
    timeout: Duration,
) -> Result<Transport, ClientError> {
    negotiate_with(
        address,
        &client_supported_protocols(),
        &default_factories(),
        timeout,
    )
    .await
}

/// Negotiation with explicit support list and factories (tests).
pub async fn negotiate_with(
    address: &ServerAddress,
    supported: &[ProtocolIdentifier],
    factories: &[Box<dyn TransportFactory>],
    timeout: Duration,
) -> Result<Transport, ClientError> {
    let response = http_get(address, "/", timeout).await?;
    if !(200..300).contains(&response.status) {
        return Err(ClientError::HttpStatus {
            status: response.status,
        });
    }
    let body = if response.is_gzip() {
        gzip_decode(&response.body)?
    } else {
        response.body.clone()
    };
    let advertised = decode_advertisements(&body)
        .map_err(|e| ClientError::Protocol(format!("bad discovery response: {e}")))?;

    let chosen = best_advertisement(supported, &advertised)?;
    tracing::debug!(protocol = %chosen.protocol, endpoint = %chosen.endpoint_path, "negotiated protocol");

    let factory = factories
        .iter()
        .find(|f| f.supports(&chosen.protocol))
        .ok_or_else(|| {
            ClientError::Protocol(format!(
                "no transport factory for negotiated protocol {}",
                chosen.protocol
            ))
        })?;
    Ok(factory.create(address, chosen))
}
