//! Ports: traits the bridge depends on but does not implement itself.

mod env;
mod policy;

pub use env::{EnvProvider, MapEnv, SystemEnv};
pub use policy::{AllowAllPolicy, CallerPolicy, CallerPolicyPort, StaticPolicyProvider};
