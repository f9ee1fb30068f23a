//! Mock version of an entity manager.
use mockall::mock;

use bulk_import_rs::{
    core::entity::{EntityManager, Item, SearchFilter},
    error::BatchError,
};

mock! {
    pub Manager {}
    impl EntityManager for Manager {
        fn create(&self) -> Item;
        fn search(&self, filter: &SearchFilter) -> Result<Vec<Item>, BatchError>;
        fn save(&self, item: &mut Item) -> Result<(), BatchError>;
        fn begin(&self) -> Result<(), BatchError>;
        fn commit(&self) -> Result<(), BatchError>;
        fn rollback(&self) -> Result<(), BatchError>;
        fn delete(&self, ids: &[u64]) -> Result<(), BatchError>;
        fn insert(&self, item: &mut Item, parent_id: Option<u64>) -> Result<(), BatchError>;
        fn move_item(
            &self,
            id: u64,
            old_parent: Option<u64>,
            new_parent: Option<u64>,
        ) -> Result<(), BatchError>;
    }
}
