//! Pure edits applied to a fetched policy document.
//!
//! Both functions report whether they changed anything so the caller can skip
//! a write that would only rotate the etag.

use kfgcp_core::{Binding, BindingTemplate, PolicyDocument, ServiceIdentities};

/// Remove every member owned by `identities` from every binding, whatever the
/// role.
///
/// Matching is exact: a member that differs only in case or whitespace is not
/// ours and stays. Bindings emptied by the removal are dropped; bindings that
/// were already empty are left alone.
pub fn clear_owned(policy: &mut PolicyDocument, identities: &ServiceIdentities) -> bool {
    let mut changed = false;
    policy.bindings.retain_mut(|binding| {
        let before = binding.members.len();
        binding.members.retain(|m| !identities.owns(m));
        if binding.members.len() == before {
            return true;
        }
        changed = true;
        !binding.members.is_empty()
    });
    changed
}

/// Merge binding templates into `policy`.
///
/// Template members are resolved against `identities` and the caller's email.
/// A template whose role already has a binding extends it (existing members
/// keep their order, new ones are appended once); other roles get a new
/// binding at the end.
pub fn merge_templates(
    policy: &mut PolicyDocument,
    templates: &[BindingTemplate],
    identities: &ServiceIdentities,
    caller_email: &str,
) -> bool {
    let mut changed = false;
    for template in templates {
        let resolved: Vec<String> = template
            .members
            .iter()
            .map(|m| identities.resolve_member(m, caller_email))
            .collect();

        match policy.binding_mut(&template.role) {
            Some(existing) => {
                for member in &resolved {
                    changed |= existing.add_member(member);
                }
            }
            None => {
                let mut binding = Binding::new(template.role.clone(), Vec::new());
                for member in &resolved {
                    binding.add_member(member);
                }
                if !binding.members.is_empty() {
                    policy.bindings.push(binding);
                    changed = true;
                }
            }
        }
    }
    changed
}
