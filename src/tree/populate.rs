//! Substitutes read values into a tree shape.
//!
//! The shape comes from [`Schema::skeleton`](super::Schema::skeleton) or from
//! the node-set interpreter, with every leaf already set to
//! [`ValueTree::Unset`]. Population only ever overwrites those sentinels, so a
//! leaf that failed resolution stays visible as `null` in the output.

use super::{Branch, PopulatedTree, ValueTree};
use crate::error::{Result, UaTreeError};
use crate::types::{LeafLayout, ResolutionTarget, Variant};

/// Copy `shape` and place every `(target, value)` at the target's tree location.
///
/// Intermediate branches missing from `shape` are created. Descending through
/// a leaf that already holds a value is a configuration error: two targets
/// claim overlapping locations.
pub fn populate<'a, I>(shape: &Branch, tsp: impl Into<String>, values: I) -> Result<PopulatedTree>
where
    I: IntoIterator<Item = (&'a ResolutionTarget, Variant)>,
{
    let mut data = shape.clone();
    for (target, value) in values {
        place(&mut data, target, value)?;
    }
    Ok(PopulatedTree::new(tsp, data))
}

fn place(root: &mut Branch, target: &ResolutionTarget, value: Variant) -> Result<()> {
    let Some((last, parents)) = target.tree_location.split_last() else {
        return Err(UaTreeError::config(format!(
            "target for '{}' has an empty tree location",
            target.display_name
        )));
    };

    let mut node = root;
    for key in parents {
        node = node.branch_mut(key).ok_or_else(|| {
            UaTreeError::config(format!(
                "tree location '{}' passes through the populated leaf '{}'",
                target.location_string(),
                key
            ))
        })?;
    }

    let leaf = match target.layout {
        LeafLayout::Direct => ValueTree::Value(value),
        LeafLayout::Named => {
            let mut named = Branch::new();
            named.insert(target.display_name.clone(), ValueTree::Value(value));
            ValueTree::Branch(named)
        }
    };
    node.insert(last.clone(), leaf);
    Ok(())
}
