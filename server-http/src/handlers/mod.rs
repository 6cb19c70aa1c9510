pub mod events;
pub mod health;
pub mod podcast;

pub use events::stream_events;
pub use health::health_check;
pub use podcast::{
    get_album, get_category, get_episode, get_user, list_albums, list_categories, list_episodes,
    list_users,
};
