//! The inner (rumor) event kinds this node understands, and which engine
//! owns each one (SPEC_FULL.md section C.5).

pub const DISTRIBUTION_SHARD: u16 = 1337;
pub const RECOVERY_REQUEST: u16 = 1338;
pub const RECOVERY_RESPONSE: u16 = 1339;
pub const INVITATION_RSVP: u16 = 1340;
pub const INVITATION_DENIAL: u16 = 1341;
pub const SHARD_CONFIRMATION: u16 = 1342;
pub const STEWARD_REMOVAL: u16 = 1345;
