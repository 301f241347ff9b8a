#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceInfo {
    pub space_id: String,
    pub owner_user_id: String,
    pub membership_version: i64,
    pub snapshot_seq: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
