use rand::Rng;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "gentle", "silent", "autumn", "morning", "calm", "misty", "wandering", "ancient", "green",
    "soft", "whispering", "wild", "sunny", "cosmic", "floating", "drifting", "breezy", "cool",
];

const NOUNS: &[&str] = &[
    "brook", "river", "leaf", "dew", "breeze", "cloud", "willow", "moss", "stone", "forest",
    "meadow", "rain", "sky", "sun", "moon", "star", "pollen", "seed",
];

/// Generate a human-readable name such as `misty-willow-42`
pub fn generate_display_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("seed");
    let number: u8 = rng.random_range(0..100);
    format!("{}-{}-{}", adjective, noun, number)
}

/// Whether `name` has the `adjective-noun-NN` shape
pub fn is_display_name(name: &str) -> bool {
    let mut parts = name.split('-');
    let (Some(adjective), Some(noun), Some(number), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    ADJECTIVES.contains(&adjective)
        && NOUNS.contains(&noun)
        && number.parse::<u8>().is_ok_and(|n| n < 100)
}
