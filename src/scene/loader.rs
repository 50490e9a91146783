//! Asynchronous asset loads.
//!
//! Geometry nodes with a `source` and texture layers with a `uri` start out
//! pending. Each outstanding load becomes a [`LoadRequest`] handed to the
//! engine's [`AssetLoader`]; the loader answers through a [`LoadSender`],
//! from any thread and at any time. Completions queue on a `flume` channel
//! and are applied between frames, never during a traversal.

use crate::gpu::TextureImage;
use crate::scene::NodeHandle;
use crate::state::{CoreHandle, GeometryConfig, LoadTarget};

/// One outstanding load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub node: NodeHandle,
    pub core: CoreHandle,
    pub target: LoadTarget,
    pub uri: String,
}

/// What a load produced.
#[derive(Debug, Clone)]
pub enum LoadedAsset {
    Geometry(GeometryConfig),
    Image(TextureImage),
}

/// A finished load, successful or not.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub request: LoadRequest,
    pub outcome: Result<LoadedAsset, String>,
}

/// Sending half of the completion channel.
#[derive(Debug, Clone)]
pub struct LoadSender(flume::Sender<LoadResult>);

impl LoadSender {
    /// Reports success. Returns `false` once the engine is gone.
    pub fn complete(&self, request: LoadRequest, asset: LoadedAsset) -> bool {
        self.send(LoadResult {
            request,
            outcome: Ok(asset),
        })
    }

    /// Reports failure. Returns `false` once the engine is gone.
    pub fn fail(&self, request: LoadRequest, reason: impl Into<String>) -> bool {
        self.send(LoadResult {
            request,
            outcome: Err(reason.into()),
        })
    }

    fn send(&self, result: LoadResult) -> bool {
        self.0.send(result).is_ok()
    }
}

/// Creates a completion channel.
#[must_use]
pub fn channel() -> (LoadSender, flume::Receiver<LoadResult>) {
    let (tx, rx) = flume::unbounded();
    (LoadSender(tx), rx)
}

/// Fetches assets for pending cores.
///
/// `load` must not block; it starts the fetch and returns. The sender may be
/// cloned and moved to another thread.
pub trait AssetLoader {
    fn load(&mut self, request: LoadRequest, sender: LoadSender);
}

/// Answers nothing; pending cores stay pending.
#[derive(Debug, Default)]
pub struct NullLoader;

impl AssetLoader for NullLoader {
    fn load(&mut self, request: LoadRequest, _sender: LoadSender) {
        log::debug!("No asset loader registered; '{}' stays pending", request.uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn completions_cross_threads() {
        let mut nodes: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        let mut cores: SlotMap<CoreHandle, ()> = SlotMap::with_key();
        let request = LoadRequest {
            node: nodes.insert(()),
            core: cores.insert(()),
            target: LoadTarget::TextureLayer(0),
            uri: "brick.png".into(),
        };
        let (sender, receiver) = channel();
        let worker = {
            let sender = sender.clone();
            let request = request.clone();
            std::thread::spawn(move || {
                sender.complete(request, LoadedAsset::Image(TextureImage::solid(1, 1, [255; 4])))
            })
        };
        assert!(worker.join().unwrap());
        assert!(sender.fail(request.clone(), "404"));

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.request, request);
        assert!(matches!(first.outcome, Ok(LoadedAsset::Image(_))));
        assert_eq!(receiver.try_recv().unwrap().outcome.unwrap_err(), "404");

        drop(receiver);
        assert!(!sender.fail(request, "gone"));
    }
}
