//! Deployment request validation.
//!
//! Validation is a fail-fast chain run before any remote side effect:
//!
//! 1. structural presence (servers, protocol, images)
//! 2. node count bounds
//! 3. resource fields parse as integers
//! 4. image names only use allowed characters
//! 5. the protocol name only uses allowed characters
//!
//! Image and protocol names end up in remote commands, so the character
//! check is a command-injection guard and not cosmetic.

use derive_more::Deref;

use crate::{DeploymentRequest, error::ValidationError};

/// Maximum number of nodes in a single deployment.
pub const MAX_NODES: usize = 200;

/// Punctuation allowed in identifiers on top of ASCII alphanumerics.
const ALLOWED_PUNCTUATION: &[char] = &[' ', '-', '_', '.', ':', '/', '@'];

/// A request that passed [`validate`]. It cannot be mutated afterwards.
#[derive(Debug, Clone, Deref)]
pub struct ValidatedRequest(DeploymentRequest);

impl ValidatedRequest {
    /// Validate `request` and freeze it.
    pub fn new(request: DeploymentRequest) -> Result<Self, ValidationError> {
        validate(&request)?;
        Ok(Self(request))
    }

    /// Give the request back.
    pub fn into_inner(self) -> DeploymentRequest {
        self.0
    }
}

/// Validate a deployment request. The first failing stage wins.
pub fn validate(request: &DeploymentRequest) -> Result<(), ValidationError> {
    check_for_missing(request)?;
    validate_node_count(request)?;
    validate_resources(request)?;
    validate_images(request)?;
    validate_protocol(request)?;
    Ok(())
}

fn check_for_missing(request: &DeploymentRequest) -> Result<(), ValidationError> {
    match &request.servers {
        None => return Err(ValidationError::ServersNull),
        Some(servers) if servers.is_empty() => return Err(ValidationError::ServersEmpty),
        Some(_) => {}
    }

    if request.protocol.is_empty() {
        return Err(ValidationError::ProtocolEmpty);
    }

    match &request.images {
        None => Err(ValidationError::ImagesNull),
        Some(images) if images.is_empty() => Err(ValidationError::ImagesEmpty),
        Some(_) => Ok(()),
    }
}

fn validate_node_count(request: &DeploymentRequest) -> Result<(), ValidationError> {
    if request.nodes < 1 {
        return Err(ValidationError::NoNodes);
    }
    if request.nodes > MAX_NODES {
        return Err(ValidationError::TooManyNodes { max: MAX_NODES });
    }
    Ok(())
}

fn validate_resources(request: &DeploymentRequest) -> Result<(), ValidationError> {
    for (node, resources) in request.resources.iter().enumerate() {
        for value in [&resources.cpus, &resources.memory] {
            if value.is_empty() {
                continue;
            }
            value
                .parse::<i64>()
                .map_err(|source| ValidationError::Resource {
                    node,
                    value: value.clone(),
                    source,
                })?;
        }
    }
    Ok(())
}

fn validate_images(request: &DeploymentRequest) -> Result<(), ValidationError> {
    request
        .images
        .iter()
        .flatten()
        .try_for_each(|image| check_charset(image))
}

fn validate_protocol(request: &DeploymentRequest) -> Result<(), ValidationError> {
    check_charset(&request.protocol)
}

/// Report the first character of `value` outside the allow-list.
pub fn check_charset(value: &str) -> Result<(), ValidationError> {
    match value.chars().find(|c| !is_allowed(*c)) {
        Some(character) => Err(ValidationError::InvalidCharacter {
            value: value.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)
}
