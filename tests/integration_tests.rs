mod integration {
    mod cache_tests;
    mod concurrency_tests;
    mod git_tests;
    mod report_tests;
}
