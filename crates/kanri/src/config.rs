use crate::error::SupervisorError;
use crate::types::Definitions;

/// Where service definitions come from. Read once at startup and again on
/// every `reload`.
pub trait ConfigSource {
	fn load(&self) -> Result<Definitions, SupervisorError>;
}

/// A fixed set of definitions. Reloading it never changes anything.
impl ConfigSource for Definitions {
	fn load(&self) -> Result<Definitions, SupervisorError> {
		Ok(self.clone())
	}
}
