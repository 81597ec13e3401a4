use core::fmt;

const COLORS: &[(&str, &str)] = &[
    ("Aqua", "#00ffff"),
    ("Azure", "#f0ffff"),
    ("Black", "#000000"),
    ("Blue", "#0000ff"),
    ("Chartreuse", "#7fff00"),
    ("Coral", "#ff7f50"),
    ("Crimson", "#dc143c"),
    ("Fuchsia", "#ff00ff"),
    ("Gold", "#ffd700"),
    ("Green", "#008000"),
    ("Indigo", "#4b0082"),
    ("Khaki", "#f0e68c"),
    ("Lime", "#00ff00"),
    ("Maroon", "#800000"),
    ("Navy", "#000080"),
    ("Olive", "#808000"),
    ("Orange", "#ffa500"),
    ("Orchid", "#da70d6"),
    ("Purple", "#800080"),
    ("Red", "#ff0000"),
    ("Salmon", "#fa8072"),
    ("Silver", "#c0c0c0"),
    ("Teal", "#008080"),
    ("Tomato", "#ff6347"),
    ("Turquoise", "#40e0d0"),
    ("Violet", "#ee82ee"),
    ("Yellow", "#ffff00"),
];

const SYMBOLS: &[char] = &[
    '♈', '♉', '♊', '♋', '♌', '♍', '♎', '♏', '♐', '♑', '♒', '♓', '♠', '♣', '♥', '♦', '☀', '☁',
    '☂', '☄', '★', '☯', '⚓', '⚘', '⚙', '⚛', '✈', '✠', '✡',
];

/// Decorative label of a fleet state, so that operators can tell at a glance
/// whether two nodes see the same fleet.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Nickname {
    pub color_name: &'static str,
    /// Color as `#rrggbb`
    pub color_hex: &'static str,
    pub symbol: char,
}

impl Nickname {
    pub(crate) fn from_digest(digest: &[u8; 32]) -> Self {
        let color = u16::from_be_bytes([digest[0], digest[1]]) as usize % COLORS.len();
        let symbol = u16::from_be_bytes([digest[2], digest[3]]) as usize % SYMBOLS.len();

        let (color_name, color_hex) = COLORS[color];

        Self {
            color_name,
            color_hex,
            symbol: SYMBOLS[symbol],
        }
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.color_name, self.symbol)
    }
}
