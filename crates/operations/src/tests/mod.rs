mod result_tests;
