//! Development identity provider
//!
//! Accepts tokens of the form `user_id:display_name[:role]`. Good enough for
//! local parties and testing; deployments put a real provider in front.

use party_core::{Identity, IdentityProvider, Role};

pub struct DevIdentityProvider;

impl IdentityProvider for DevIdentityProvider {
    fn authenticate(&self, token: &str) -> Option<Identity> {
        let mut parts = token.splitn(3, ':');
        let user_id = parts.next()?.trim();
        let display_name = parts.next()?.trim();
        if user_id.is_empty() || display_name.is_empty() {
            return None;
        }

        let role = match parts.next().map(str::trim) {
            None | Some("") | Some("user") => Role::User,
            Some("moderator") => Role::Moderator,
            Some("admin") => Role::Admin,
            Some(_) => return None,
        };
        Some(Identity::new(user_id, display_name).with_role(role))
    }
}
