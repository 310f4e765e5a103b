//! Domain entities
//!
//! Stories are the aggregate roots; everything else is reached through a
//! story or, for a user's profile photo, through the user.

pub mod markup;
pub mod media;
pub mod moment;
pub mod story;
pub mod user;
pub mod venue;

pub use markup::{Markup, MarkupRecord};
pub use media::{Media, MediaKind, MediaRecord};
pub use moment::{Moment, MomentRecord};
pub use story::{Story, StoryRecord};
pub use user::{User, UserRecord};
pub use venue::{Venue, VenueRecord};
