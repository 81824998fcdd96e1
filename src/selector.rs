use std::fmt;

/// How to locate elements: by element id, CSS selector, or XPath expression.
///
/// One selector works with every lookup operation; the strategy tag replaces
/// per-strategy method pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn id(value: impl Into<String>) -> Self {
        Selector::Id(value.into())
    }

    pub fn css(value: impl Into<String>) -> Self {
        Selector::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Selector::XPath(value.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(v) => write!(f, "id={v}"),
            Selector::Css(v) => write!(f, "css={v}"),
            Selector::XPath(v) => write!(f, "xpath={v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_strategy() {
        assert_eq!(Selector::id("login").to_string(), "id=login");
        assert_eq!(Selector::css(".item > a").to_string(), "css=.item > a");
        assert_eq!(
            Selector::xpath("//div[@class='row']").to_string(),
            "xpath=//div[@class='row']"
        );
    }

    #[test]
    fn constructors_accept_str_and_string() {
        assert_eq!(Selector::css("p"), Selector::Css("p".to_string()));
        assert_eq!(Selector::id(String::from("x")), Selector::Id("x".into()));
    }
}
