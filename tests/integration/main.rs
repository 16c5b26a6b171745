mod crawl_tests;
mod store_tests;
