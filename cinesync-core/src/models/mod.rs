pub mod current;
pub mod id;
pub mod movie;
pub mod permission;
pub mod room;
pub mod user;

pub use current::{Current, CurrentMovie, Status};
pub use id::{generate_id, is_valid_id, MovieId, RoomId, UserId};
pub use movie::{
    AlistSource, BilibiliSource, EmbySource, MoreSource, Movie, MovieBase, Subtitle, VendorInfo,
};
pub use permission::Permission;
pub use room::{MemberStatus, Room, RoomMember, RoomSettings, RoomStatus};
pub use user::{User, UserRole};
