//! Validation of PatroniCluster specs before any member is created

use std::collections::HashSet;

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::PatroniCluster;
use crate::resources::common::member_name;

/// Longest name usable as a DNS-1123 label
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// StatefulSet pods append `-<ordinal>` to the member name
const POD_ORDINAL_SUFFIX_LEN: usize = 2;

/// Validate the cluster spec
pub fn validate_spec(cluster: &PatroniCluster) -> Result<()> {
    validate_image(cluster)?;
    validate_node_names(cluster)?;
    Ok(())
}

fn validate_image(cluster: &PatroniCluster) -> Result<()> {
    if cluster.spec.image.trim().is_empty() {
        return Err(Error::ValidationError("image must not be empty".to_string()));
    }
    Ok(())
}

/// Node names must be non-empty, unique, and form valid member names
fn validate_node_names(cluster: &PatroniCluster) -> Result<()> {
    let nodes = &cluster.spec.node_names;
    if nodes.is_empty() {
        return Err(Error::ValidationError(
            "nodeList must contain at least one node".to_string(),
        ));
    }

    let cluster_name = cluster.name_any();
    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if node.is_empty() {
            return Err(Error::ValidationError(
                "nodeList entries must not be empty".to_string(),
            ));
        }
        if !seen.insert(node.as_str()) {
            return Err(Error::ValidationError(format!(
                "duplicate node name in nodeList: {}",
                node
            )));
        }

        let member = member_name(&cluster_name, node);
        if !is_dns_label(&member) || member.len() + POD_ORDINAL_SUFFIX_LEN > MAX_DNS_LABEL_LEN {
            return Err(Error::ValidationError(format!(
                "member name {} is not a valid DNS label of at most {} characters",
                member,
                MAX_DNS_LABEL_LEN - POD_ORDINAL_SUFFIX_LEN
            )));
        }
    }

    Ok(())
}

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
pub fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    bytes.len() <= MAX_DNS_LABEL_LEN
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}
