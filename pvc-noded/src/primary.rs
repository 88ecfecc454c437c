//! [`PrimaryResolver`] for task submission from within `pvc-noded`
//! itself.

use std::sync::Arc;

use async_trait::async_trait;
use pvc_core::error::PvcResult;
use pvc_core::tasks::PrimaryResolver;

use crate::view::NodeView;

pub struct ViewPrimaryResolver {
    view: Arc<NodeView>,
}

impl ViewPrimaryResolver {
    pub fn new(view: Arc<NodeView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl PrimaryResolver for ViewPrimaryResolver {
    async fn current_primary(&self) -> PvcResult<String> {
        self.view.current_primary().await
    }
}
