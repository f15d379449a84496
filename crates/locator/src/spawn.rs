use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};

/// Returns the ambient Tokio handle, or a small crate-owned runtime when the
/// caller is not inside one (plain threads registering or requesting).
fn runtime_handle() -> Option<Handle> {
	if let Ok(handle) = Handle::try_current() {
		return Some(handle);
	}

	static FALLBACK_RT: OnceLock<Option<Runtime>> = OnceLock::new();
	let runtime = FALLBACK_RT.get_or_init(|| {
		let built = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("waypost-locator-watch")
			.build();
		match built {
			Ok(rt) => {
				tracing::debug!("locator.spawn.fallback_runtime");
				Some(rt)
			}
			Err(error) => {
				tracing::error!(%error, "locator.spawn.fallback_runtime_failed");
				None
			}
		}
	});
	runtime.as_ref().map(|rt| rt.handle().clone())
}

/// Spawns a detached background task. Returns `false` if no runtime exists.
pub(crate) fn spawn_detached<F>(what: &'static str, fut: F) -> bool
where
	F: Future<Output = ()> + Send + 'static,
{
	let Some(handle) = runtime_handle() else {
		tracing::warn!(task = what, "locator.spawn.no_runtime");
		return false;
	};
	tracing::trace!(task = what, "locator.spawn");
	drop(handle.spawn(fut));
	true
}
