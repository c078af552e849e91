use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::db::models::{EventInput, EVENT_TYPE_IN_PERSON, EVENT_TYPE_ONLINE};
use crate::db::EventRepository;
use crate::error::AppResult;

/// Insert a batch of sample events owned by the given organizer. Idempotent:
/// does nothing once any event exists. Only ever invoked from the explicit
/// admin endpoint, never from a read path.
pub async fn seed_events(pool: &SqlitePool, organizer_id: &str) -> AppResult<usize> {
    if EventRepository::count_all(pool).await? > 0 {
        tracing::info!("Events already exist, skipping seed");
        return Ok(0);
    }

    let events = sample_events();
    let count = events.len();

    for input in &events {
        EventRepository::insert(pool, organizer_id, input).await?;
    }

    tracing::info!("Seeded {} sample events for organizer {}", count, organizer_id);
    Ok(count)
}

fn sample_events() -> Vec<EventInput> {
    let now = Utc::now().naive_utc();

    vec![
        EventInput {
            title: "Tech Meetup: Rust in Production".to_string(),
            description: "An evening of talks on running Rust services in production: \
                          deployment stories, performance tuning and the inevitable \
                          async war stories. Perfect for developers curious about the \
                          ecosystem."
                .to_string(),
            location: "Tech Hub Downtown".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: now + Duration::days(7),
            end_date: Some(now + Duration::days(7) + Duration::hours(2)),
            price: 0.0,
            max_attendees: Some(50),
            image_url: Some(
                "https://images.unsplash.com/photo-1515187029135-18ee286d815b?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
        EventInput {
            title: "Virtual Design Workshop".to_string(),
            description: "Learn the fundamentals of UI/UX design in this hands-on \
                          workshop. We'll cover user research, wireframing, prototyping \
                          and design systems. Bring your laptop and creativity!"
                .to_string(),
            location: "Zoom Meeting".to_string(),
            event_type: EVENT_TYPE_ONLINE.to_string(),
            date: now + Duration::days(10),
            end_date: Some(now + Duration::days(10) + Duration::hours(3)),
            price: 25.0,
            max_attendees: Some(30),
            image_url: Some(
                "https://images.unsplash.com/photo-1558655146-d09347e92766?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
        EventInput {
            title: "Community Garden Volunteer Day".to_string(),
            description: "Help us maintain our community garden! We'll be planting \
                          vegetables, weeding and learning about sustainable gardening \
                          practices. All skill levels welcome. Tools and refreshments \
                          provided."
                .to_string(),
            location: "Community Garden - 123 Green Street".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: now + Duration::days(14),
            end_date: Some(now + Duration::days(14) + Duration::hours(4)),
            price: 0.0,
            max_attendees: Some(25),
            image_url: Some(
                "https://images.unsplash.com/photo-1416879595882-3373a0480b5b?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
        EventInput {
            title: "Photography Masterclass".to_string(),
            description: "Professional photographer Sarah Johnson will teach advanced \
                          photography techniques including composition, lighting and \
                          post-processing. Bring your camera and questions!"
                .to_string(),
            location: "Art Gallery Studio".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: now + Duration::days(21),
            end_date: Some(now + Duration::days(21) + Duration::hours(5)),
            price: 75.0,
            max_attendees: Some(15),
            image_url: Some(
                "https://images.unsplash.com/photo-1606983340126-99ab4feaa64a?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
        EventInput {
            title: "Book Club: Sci-Fi Discussion".to_string(),
            description: "Join our monthly book club discussion of 'The Martian' by \
                          Andy Weir. We'll explore themes of survival, science and \
                          human resilience. New members always welcome!"
                .to_string(),
            location: "Public Library - Meeting Room A".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: now + Duration::days(28),
            end_date: Some(now + Duration::days(28) + Duration::minutes(90)),
            price: 0.0,
            max_attendees: Some(20),
            image_url: Some(
                "https://images.unsplash.com/photo-1481627834876-b7833e8f5570?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
        EventInput {
            title: "Cooking Class: Italian Cuisine".to_string(),
            description: "Learn to make authentic Italian pasta and sauces from \
                          scratch! Chef Marco will guide you through traditional \
                          techniques. All ingredients and equipment provided."
                .to_string(),
            location: "Culinary School Kitchen".to_string(),
            event_type: EVENT_TYPE_IN_PERSON.to_string(),
            date: now + Duration::days(35),
            end_date: Some(now + Duration::days(35) + Duration::hours(3)),
            price: 45.0,
            max_attendees: Some(12),
            image_url: Some(
                "https://images.unsplash.com/photo-1556909114-f6e7ad7d3136?w=800&h=400&fit=crop"
                    .to_string(),
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;
    use crate::db::UserRepository;

    #[tokio::test]
    async fn seeding_twice_inserts_once() {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let organizer = UserRepository::insert(&pool, "admin@example.com", "hash", "Admin")
            .await
            .unwrap();

        let first = seed_events(&pool, &organizer.id).await.unwrap();
        assert_eq!(first, 6);

        let second = seed_events(&pool, &organizer.id).await.unwrap();
        assert_eq!(second, 0);

        assert_eq!(EventRepository::count_all(&pool).await.unwrap(), 6);
    }

    #[test]
    fn sample_prices_derive_is_free() {
        let events = sample_events();
        assert!(events.iter().any(|e| e.is_free()));
        assert!(events.iter().any(|e| !e.is_free()));
    }
}
