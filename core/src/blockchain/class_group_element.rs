use crate::blockchain::sized_bytes::{Bytes100, Bytes32};
use crate::utils::std_hash;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};

#[derive(Streamable, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ClassgroupElement {
    pub data: Bytes100,
}
impl ClassgroupElement {
    /// Serialized identity form, the starting point of every VDF chain.
    #[must_use]
    pub fn get_default_element() -> Self {
        let mut data = [0u8; 100];
        data[0] = 0x08;
        Self {
            data: Bytes100::new(data),
        }
    }
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::get_default_element()
    }
    #[must_use]
    pub fn get_hash(&self) -> Bytes32 {
        std_hash(self.data)
    }
}
impl Default for ClassgroupElement {
    fn default() -> Self {
        Self::get_default_element()
    }
}
