//! Handle bundling the confirmed chain database with network parameters.

use std::sync::Arc;

use crate::db::ChainDb;
use crate::params::ChainParams;
use crate::view::SpeculativeView;

/// The chain collaborator handed to the mempool at construction.
#[derive(Clone, Debug)]
pub struct Chain {
    db: Arc<ChainDb>,
    params: Arc<ChainParams>,
}

impl Chain {
    pub fn new(db: Arc<ChainDb>, params: Arc<ChainParams>) -> Self {
        Chain { db, params }
    }

    pub fn tip_height(&self) -> u32 {
        self.db.tip_height()
    }

    pub fn db(&self) -> &Arc<ChainDb> {
        &self.db
    }

    pub fn params(&self) -> &Arc<ChainParams> {
        &self.params
    }

    /// A fresh speculative view over the current confirmed state.
    pub fn speculative_view(&self) -> SpeculativeView {
        SpeculativeView::new(self.db.clone(), self.params.clone())
    }
}
