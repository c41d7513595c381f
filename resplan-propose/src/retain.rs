//! Retention check for optional+computed nested attributes.
//!
//! When an optional+computed attribute is null in config, the merge would
//! normally carry the whole prior value forward, on the theory that the
//! provider computed it and can compute it again. That theory breaks down if
//! the prior subtree contains data the practitioner put there: a populated
//! non-computed attribute anywhere below means the subtree came (at least
//! partly) from configuration that has since been removed, and silently
//! resurrecting it would undo the removal.

use tracing::trace;

use resplan_schema::{Attribute, AttributeKind, Schema};
use resplan_value::{AttributePath, Value, Walk};

/// Whether the prior value of an optional+computed nested attribute contains
/// practitioner-authored data, making it unsafe to carry forward in place of
/// a null config.
///
/// Only optional nested attributes can be "not computable": a purely computed
/// attribute is always re-derivable, and a leaf has no interior to inspect.
pub(crate) fn contains_user_set_values(
    schema: &Schema,
    attr: &Attribute,
    path: &AttributePath,
    prior: &Value,
) -> bool {
    if !attr.optional {
        return false;
    }
    if !matches!(attr.kind, AttributeKind::Nested { .. }) {
        return false;
    }

    let mut found = false;
    prior.walk(&mut |relative, value| {
        if relative.is_root() || value.is_null() {
            return Walk::Continue;
        }
        match schema.attribute_at_path(&path.join(relative)) {
            // Not an attribute position (element key, interior of the walk);
            // the decisive attribute is further down.
            None => Walk::Continue,
            Some(nested) => {
                if nested.computed {
                    Walk::Continue
                } else {
                    found = true;
                    Walk::Stop
                }
            }
        }
    });
    if found {
        trace!(attribute = %path, "prior value contains user-set data, not carrying it forward");
    }
    found
}
