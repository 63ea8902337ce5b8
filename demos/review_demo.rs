use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    attribute_review::example_apps::run_review_demo(std::env::args().skip(1))
}
