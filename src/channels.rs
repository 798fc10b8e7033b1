use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_uploader: broadcast::Sender<crate::pvoutput::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_uploader: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(64).0
    }
}
