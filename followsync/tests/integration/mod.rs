mod reconcile_test;
