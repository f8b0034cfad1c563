//! Infers a tree shape from a node set.
//!
//! Precedence, per descriptor:
//!
//! 1. an explicit `Path` (`"Machine1.Tank.Temperature"`) is split on `.`
//! 2. a string NodeId whose identifier contains dots is split the same way
//! 3. otherwise the location is a single key: the display name when it
//!    differs from the browse name, else the bare browse name
//!
//! When both 1 and 2 apply they must agree. Two descriptors that land on the
//! same location, or where one location is a strict prefix of another, are
//! rejected: with collisions the input order would decide which value is kept.

use super::VariableDescriptor;
use crate::error::{Result, UaTreeError};
use crate::tree::{build_nested, merge, Branch, ValueTree};
use crate::types::{LeafLayout, ResolutionTarget};
use std::collections::{HashMap, HashSet};

/// Which rule produced a descriptor's tree location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    ExplicitPath,
    DottedIdentifier,
    Name,
}

impl LocationSource {
    /// Hierarchical locations double as browse paths
    pub fn is_hierarchical(&self) -> bool {
        !matches!(self, LocationSource::Name)
    }
}

/// Result of interpreting a node set
#[derive(Debug, Clone)]
pub struct Interpretation {
    /// One target per variable descriptor, in input order
    pub targets: Vec<ResolutionTarget>,
    /// Rule used for each target, parallel to `targets`
    pub sources: Vec<LocationSource>,
    /// Inferred tree shape with every leaf unset
    pub shape: Branch,
    /// Descriptors skipped because they are not variables
    pub skipped: usize,
}

/// Turn descriptors into resolution targets plus the inferred tree shape.
pub fn interpret(descriptors: &[VariableDescriptor]) -> Result<Interpretation> {
    let mut targets = Vec::with_capacity(descriptors.len());
    let mut sources = Vec::with_capacity(descriptors.len());
    let mut labels = Vec::with_capacity(descriptors.len());
    let mut skipped = 0;

    for descriptor in descriptors {
        if !descriptor.is_variable() {
            tracing::debug!(
                "Skipping node-set entry {} with class {:?}",
                descriptor.label(),
                descriptor.node_class
            );
            skipped += 1;
            continue;
        }
        let (target, source) = locate(descriptor)?;
        targets.push(target);
        sources.push(source);
        labels.push(descriptor.label());
    }

    check_collisions(&targets, &labels)?;

    // Input order; collisions were rejected above, so no leaf is overwritten
    let mut shape = Branch::new();
    for target in &targets {
        shape = merge(shape, build_nested(&target.tree_location, ValueTree::Unset)?);
    }

    Ok(Interpretation {
        targets,
        sources,
        shape,
        skipped,
    })
}

fn locate(descriptor: &VariableDescriptor) -> Result<(ResolutionTarget, LocationSource)> {
    let explicit = descriptor
        .path
        .as_deref()
        .map(|path| split_explicit_path(path, descriptor))
        .transpose()?;
    let dotted = descriptor.node_id.as_ref().and_then(|id| id.path_segments());

    let (tree_location, source) = match (explicit, dotted) {
        (Some(path), Some(from_id)) if path != from_id => {
            return Err(UaTreeError::config(format!(
                "descriptor {} has Path '{}' that disagrees with its NodeId path '{}'",
                descriptor.label(),
                path.join("."),
                from_id.join(".")
            )));
        }
        (Some(path), _) => (path, LocationSource::ExplicitPath),
        (None, Some(from_id)) => (from_id, LocationSource::DottedIdentifier),
        (None, None) => (vec![fallback_name(descriptor)?], LocationSource::Name),
    };

    let remote_path = if source.is_hierarchical() {
        tree_location.clone()
    } else {
        let name = descriptor
            .bare_browse_name()
            .or_else(|| descriptor.display_text())
            .ok_or_else(|| no_name_error(descriptor))?;
        vec![name.to_string()]
    };

    let display_name = descriptor
        .bare_browse_name()
        .map(str::to_string)
        .or_else(|| tree_location.last().cloned())
        .unwrap_or_default();

    Ok((
        ResolutionTarget {
            tree_location,
            remote_path,
            display_name,
            layout: LeafLayout::Direct,
        },
        source,
    ))
}

fn split_explicit_path(path: &str, descriptor: &VariableDescriptor) -> Result<Vec<String>> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(UaTreeError::config(format!(
            "descriptor {} has an invalid Path '{}'",
            descriptor.label(),
            path
        )));
    }
    Ok(segments)
}

fn fallback_name(descriptor: &VariableDescriptor) -> Result<String> {
    let browse = descriptor.bare_browse_name();
    let display = descriptor.display_text();
    match (display, browse) {
        (Some(display), Some(browse)) if display != browse => Ok(display.to_string()),
        (_, Some(browse)) => Ok(browse.to_string()),
        (Some(display), None) => Ok(display.to_string()),
        (None, None) => Err(no_name_error(descriptor)),
    }
}

fn no_name_error(descriptor: &VariableDescriptor) -> UaTreeError {
    UaTreeError::config(format!(
        "descriptor {} has no Path, no dotted string NodeId and no BrowseName or DisplayName",
        descriptor.label()
    ))
}

fn check_collisions(targets: &[ResolutionTarget], labels: &[String]) -> Result<()> {
    let mut leaves: HashMap<&[String], usize> = HashMap::new();
    let mut interiors: HashMap<&[String], usize> = HashMap::new();

    for (index, target) in targets.iter().enumerate() {
        let location = target.tree_location.as_slice();
        let collides_with = leaves
            .get(location)
            .or_else(|| interiors.get(location))
            .or_else(|| (1..location.len()).find_map(|n| leaves.get(&location[..n])))
            .copied();

        if let Some(other) = collides_with {
            return Err(UaTreeError::config(format!(
                "node-set locations collide: {} at '{}' and {} at '{}'",
                labels[other],
                targets[other].location_string(),
                labels[index],
                target.location_string()
            )));
        }

        leaves.insert(location, index);
        for n in 1..location.len() {
            interiors.entry(&location[..n]).or_insert(index);
        }
    }
    Ok(())
}

/// Dotted locations that appear more than once, for diagnostics
pub fn duplicate_locations(targets: &[ResolutionTarget]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for target in targets {
        let location = target.location_string();
        if !seen.insert(location.clone()) && !duplicates.contains(&location) {
            duplicates.push(location);
        }
    }
    duplicates
}
